//! Packet coherence: how admissible a single packet is, in `[0, 1]`.
//!
//! The score is the sender's field signal scaled by how well the packet's
//! ambient signals hold together:
//!
//! ```text
//! field_signal = 0.6 · coherence · max(0, 1 − hop_decay · hops) + 0.4 · field_strength
//! ambient      = 0.4 · geometry + 0.2 · harmonic + 0.2 · presence + 0.2 · continuity
//!                (blended 3:1 with resonance / 100 when both signatures are known)
//! score        = field_signal · (0.6 + 0.4 · ambient)
//! ```
//!
//! A silent field (coherence and strength both zero) therefore always
//! scores zero, whatever the other layers say.

use serde::Serialize;

use crate::packet::Packet;
use crate::resonance::resonance;
use crate::signature::IdentitySignature;
use crate::types::{clamp_unit, DEFAULT_GEOMETRY, PHI, RECOGNIZED_GEOMETRIES, REFERENCE_HARMONICS};

/// Configuration for the coherence engine.
#[derive(Debug, Clone)]
pub struct CoherenceConfig {
    /// Minimum admission score (default 0.3).
    pub min_coherence: f64,
    /// Coherence lost per recorded hop (default 0.01).
    pub hop_decay: f64,
    /// Geometry that scores a perfect 1.0.
    pub reference_geometry: String,
    /// Hop-to-hop coherence drop that counts as a gap (default 0.3).
    pub gap_threshold: f64,
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            min_coherence: 0.3,
            hop_decay: 0.01,
            reference_geometry: DEFAULT_GEOMETRY.to_string(),
            gap_threshold: 0.3,
        }
    }
}

/// Individual signals behind a score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoherenceComponents {
    pub field_signal: f64,
    pub geometry: f64,
    pub harmonic: f64,
    pub presence: f64,
    pub continuity: f64,
    /// Signature resonance, when both sides were known.
    pub resonance: Option<f64>,
    pub ambient: f64,
}

/// Outcome of scoring one packet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoherenceReport {
    pub score: f64,
    pub admitted: bool,
    /// Threshold the score was held against.
    pub required: f64,
    pub components: CoherenceComponents,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Scores packets. Pure: holds configuration only.
#[derive(Debug, Clone, Default)]
pub struct CoherenceEngine {
    config: CoherenceConfig,
}

impl CoherenceEngine {
    pub fn new(config: CoherenceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CoherenceConfig {
        &self.config
    }

    /// Score alone.
    pub fn coherence(&self, packet: &Packet) -> f64 {
        self.score(packet, None).score
    }

    /// Full report. `signatures` is `(local, peer)` when both are known.
    pub fn score(
        &self,
        packet: &Packet,
        signatures: Option<(&IdentitySignature, &IdentitySignature)>,
    ) -> CoherenceReport {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();

        // ── Field signal ────────────────────────────────────────────
        let decay = (1.0 - self.config.hop_decay * packet.hops() as f64).max(0.0);
        let effective = packet.field.coherence * decay;
        let field_signal = clamp_unit(0.6 * effective + 0.4 * packet.field.field_strength);

        if packet.field.coherence < self.config.min_coherence {
            issues.push(format!(
                "field coherence {:.2} is below {:.2}",
                packet.field.coherence, self.config.min_coherence
            ));
            recommendations.push("center before sending to raise field coherence".to_string());
        }
        if packet.field.field_strength < 0.3 {
            issues.push(format!("field strength {:.2} is weak", packet.field.field_strength));
            recommendations.push("strengthen the field before reaching out".to_string());
        }

        // ── Ambient signals ─────────────────────────────────────────
        let geometry = self.geometry_score(&packet.field.geometry);
        if geometry == 0.0 {
            issues.push(format!("unrecognized geometry {:?}", packet.field.geometry));
            recommendations.push(format!(
                "use a recognized geometry such as {}",
                self.config.reference_geometry
            ));
        }

        let harmonic = harmonic_score(&packet.field.harmonics);
        if harmonic < 0.5 {
            issues.push("harmonics do not resonate with the reference frequencies".to_string());
            recommendations.push("tune harmonics toward the solfeggio frequencies".to_string());
        }

        let presence = packet.presence.quality.mean();
        if presence < 0.5 {
            issues.push(format!("presence quality {presence:.2} is shallow"));
            recommendations.push("deepen presence before sharing".to_string());
        }

        let gaps = self.count_gaps(&packet.metadata.coherence_history);
        let continuity = (1.0 - 0.25 * gaps as f64).max(0.0);
        if gaps > 0 {
            issues.push(format!("{gaps} coherence gap(s) along the route"));
            recommendations.push("restore continuity: coherence dropped sharply between hops".to_string());
        }

        let mut ambient = 0.4 * geometry + 0.2 * harmonic + 0.2 * presence + 0.2 * continuity;
        let resonance = signatures.map(|(local, peer)| resonance(local, peer));
        if let Some(r) = resonance {
            ambient = 0.75 * ambient + 0.25 * r / 100.0;
        }

        // ── Verdict ─────────────────────────────────────────────────
        let score = clamp_unit(field_signal * (0.6 + 0.4 * ambient));
        let required = self
            .config
            .min_coherence
            .max(packet.resonance.coherence_required);
        let admitted = score > 0.0 && score >= required;
        if !admitted {
            issues.push(format!("coherence score {score:.2} is below the required {required:.2}"));
        }

        CoherenceReport {
            score,
            admitted,
            required,
            components: CoherenceComponents {
                field_signal,
                geometry,
                harmonic,
                presence,
                continuity,
                resonance,
                ambient,
            },
            issues,
            recommendations,
        }
    }

    fn geometry_score(&self, geometry: &str) -> f64 {
        if !RECOGNIZED_GEOMETRIES.contains(&geometry) {
            return 0.0;
        }
        if geometry == self.config.reference_geometry {
            return 1.0;
        }
        geometry_relation(geometry, &self.config.reference_geometry)
    }

    fn count_gaps(&self, history: &[f64]) -> usize {
        history
            .windows(2)
            .filter(|w| w[0] - w[1] > self.config.gap_threshold)
            .count()
    }
}

/// Relation between two recognized geometries. Symmetric.
pub fn geometry_relation(a: &str, b: &str) -> f64 {
    const TABLE: [(&str, &str, f64); 7] = [
        ("flower_of_life", "seed_of_life", 0.9),
        ("flower_of_life", "metatrons_cube", 0.8),
        ("flower_of_life", "sri_yantra", 0.7),
        ("flower_of_life", "vesica_piscis", 0.85),
        ("seed_of_life", "vesica_piscis", 0.95),
        ("seed_of_life", "metatrons_cube", 0.75),
        ("seed_of_life", "sri_yantra", 0.6),
    ];
    if a == b {
        return 1.0;
    }
    TABLE
        .iter()
        .find(|(x, y, _)| (*x == a && *y == b) || (*x == b && *y == a))
        .map(|(_, _, v)| *v)
        .unwrap_or(0.5)
}

/// Resonance between two frequencies in `[0, 1]`.
///
/// Whole-number ratios score `1/n`, the golden ratio 0.9, anything else
/// falls off with absolute distance.
pub fn frequency_resonance(f1: f64, f2: f64) -> f64 {
    if f1 <= 0.0 || f2 <= 0.0 {
        return 0.0;
    }
    let ratio = f1.max(f2) / f1.min(f2);
    let nearest = ratio.round();
    if (ratio - nearest).abs() < 0.01 && nearest >= 1.0 {
        return 1.0 / nearest;
    }
    if (ratio - PHI).abs() < 0.01 {
        return 0.9;
    }
    (-(f1 - f2).abs() / 100.0).exp()
}

/// Best resonance of any harmonic against the reference set. Empty is 0.
pub fn harmonic_score(harmonics: &[f64]) -> f64 {
    harmonics
        .iter()
        .flat_map(|h| REFERENCE_HARMONICS.iter().map(move |r| frequency_resonance(*h, *r)))
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::SeededEntropy;
    use crate::packet::PacketBuilder;
    use crate::signature::{Attunement, Key, Mode};

    fn builder() -> PacketBuilder {
        PacketBuilder::new("share_presence").content(serde_json::json!({"text": "here"}))
    }

    fn build(b: PacketBuilder) -> Packet {
        b.build_at(&mut SeededEntropy::new(1), 1_000)
    }

    #[test]
    fn silent_field_is_rejected_whatever_else() {
        let engine = CoherenceEngine::default();
        let p = build(
            builder()
                .coherence(0.0)
                .field_strength(0.0)
                .coherence_required(0.0),
        );
        let report = engine.score(&p, None);
        assert_eq!(report.score, 0.0);
        assert!(!report.admitted);
    }

    #[test]
    fn perfect_field_scores_above_point_nine() {
        let engine = CoherenceEngine::default();
        let p = build(builder().coherence(1.0).field_strength(1.0).geometry("flower_of_life"));
        let report = engine.score(&p, None);
        assert!(report.admitted);
        assert!(report.score > 0.9, "score was {}", report.score);
    }

    #[test]
    fn perfect_field_with_other_recognized_geometry_is_admitted() {
        let engine = CoherenceEngine::default();
        let p = build(builder().coherence(1.0).field_strength(1.0).geometry("seed_of_life"));
        let report = engine.score(&p, None);
        assert!(report.admitted);
        assert!(report.score > 0.9, "score was {}", report.score);
    }

    #[test]
    fn unrecognized_geometry_costs_but_is_reported() {
        let engine = CoherenceEngine::default();
        let good = engine.coherence(&build(builder().coherence(0.8)));
        let report = engine.score(&build(builder().coherence(0.8).geometry("spiral")), None);
        assert!(report.score < good);
        assert_eq!(report.components.geometry, 0.0);
        assert!(report.issues.iter().any(|i| i.contains("spiral")));
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn packet_can_demand_more_than_the_engine() {
        let engine = CoherenceEngine::default();
        let lenient = build(builder().coherence(0.6));
        let strict = build(builder().coherence(0.6).coherence_required(0.95));
        assert!(engine.score(&lenient, None).admitted);
        let report = engine.score(&strict, None);
        assert!(!report.admitted);
        assert_eq!(report.required, 0.95);
    }

    #[test]
    fn hops_decay_the_field_signal() {
        let engine = CoherenceEngine::default();
        let fresh = build(builder().coherence(0.9));
        let mut travelled = fresh.clone();
        for i in 0..10 {
            travelled.record_hop(format!("hop-{i}"), 0.9);
        }
        assert!(engine.coherence(&travelled) < engine.coherence(&fresh));
    }

    #[test]
    fn gradual_decline_has_no_gaps() {
        let engine = CoherenceEngine::default();
        let mut p = build(builder().coherence(0.8));
        for c in [0.8, 0.75, 0.7, 0.65] {
            p.record_hop("relay", c);
        }
        let report = engine.score(&p, None);
        assert_eq!(report.components.continuity, 1.0);
    }

    #[test]
    fn sharp_drop_is_a_gap() {
        let engine = CoherenceEngine::default();
        let mut p = build(builder().coherence(0.8));
        for c in [0.9, 0.4, 0.35] {
            p.record_hop("relay", c);
        }
        let report = engine.score(&p, None);
        assert_eq!(report.components.continuity, 0.75);
        assert!(report.issues.iter().any(|i| i.contains("gap")));
    }

    #[test]
    fn resonance_blends_into_ambient() {
        let engine = CoherenceEngine::default();
        let p = build(builder().coherence(0.7));
        let a = IdentitySignature::new(Mode::Ionian, Key::C, Attunement::Psi, "a", "query");
        let far = IdentitySignature::new(Mode::Locrian, Key::CSharp, Attunement::Beta, "b", "wander");

        let alone = engine.score(&p, None);
        let with_self = engine.score(&p, Some((&a, &a)));
        let with_far = engine.score(&p, Some((&a, &far)));
        assert_eq!(with_self.components.resonance, Some(100.0));
        assert!(with_far.score < alone.score);
        assert!(with_self.score >= with_far.score);
    }

    #[test]
    fn frequency_resonance_rules() {
        assert_eq!(frequency_resonance(432.0, 432.0), 1.0);
        assert_eq!(frequency_resonance(432.0, 864.0), 0.5);
        assert_eq!(frequency_resonance(100.0, 161.8), 0.9);
        let far = frequency_resonance(100.0, 137.0);
        assert!((far - (-0.37f64).exp()).abs() < 1e-12);
        assert_eq!(frequency_resonance(0.0, 432.0), 0.0);
    }

    #[test]
    fn harmonic_score_picks_best_pair() {
        assert_eq!(harmonic_score(&[]), 0.0);
        assert_eq!(harmonic_score(&[528.0]), 1.0);
        assert!(harmonic_score(&[10_000.0]) < 0.2);
    }

    #[test]
    fn geometry_relation_is_symmetric() {
        assert_eq!(geometry_relation("seed_of_life", "vesica_piscis"), 0.95);
        assert_eq!(geometry_relation("vesica_piscis", "seed_of_life"), 0.95);
        assert_eq!(geometry_relation("sri_yantra", "metatrons_cube"), 0.5);
    }
}
