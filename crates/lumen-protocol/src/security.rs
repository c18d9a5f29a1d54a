//! Security gate: decides whether an inbound packet may proceed.
//!
//! Checks run in a fixed order and the first failing one produces the
//! verdict:
//!
//! 1. hostile intent in purpose, covenant intention or blessing
//! 2. fear markers, or extreme urgency from an incoherent sender
//! 3. packet coherence and field strength thresholds
//! 4. resonance floor for packets addressed directly to this node
//! 5. field compatibility between sender and receiver
//!
//! A blocked packet always carries a [`Transmutation`] telling the sender
//! what to do instead.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::packet::{Packet, Target};

/// Configuration for the security gate.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Minimum sender field coherence (default 0.3).
    pub min_packet_coherence: f64,
    /// Minimum sender field strength (default 0.1).
    pub min_field_strength: f64,
    /// Resonance a peer needs to address this node directly (default 30).
    pub direct_resonance_floor: f64,
    /// Compatibility below which a packet is redirected (default 0.25).
    pub block_compatibility: f64,
    /// Compatibility below which a packet passes with advice (default 0.4).
    pub advise_compatibility: f64,
    /// Sender coherence under which extreme urgency counts as unconscious.
    pub unconscious_coherence: f64,
    /// Urgency above which an incoherent sender is held.
    pub unconscious_urgency: f64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            min_packet_coherence: 0.3,
            min_field_strength: 0.1,
            direct_resonance_floor: 30.0,
            block_compatibility: 0.25,
            advise_compatibility: 0.4,
            unconscious_coherence: 0.2,
            unconscious_urgency: 0.9,
        }
    }
}

/// Receiver-side facts the gate needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecurityContext {
    /// Local field coherence in `[0, 1]`.
    pub local_coherence: f64,
    /// Local field strength in `[0, 1]`.
    pub local_strength: f64,
    /// Resonance of the local signature with the sender's, if known.
    pub peer_resonance: Option<f64>,
    /// Packets from this peer blocked so far.
    pub prior_blocks: u32,
}

/// What the sender is asked to do with a blocked packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransmutationAction {
    /// Fear or unconscious urgency: met with care.
    EmbraceWithCompassion,
    /// Hostile intent.
    TransmuteWithLove,
    /// Weak or incompatible field: try elsewhere or later.
    Redirect,
}

impl TransmutationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransmutationAction::EmbraceWithCompassion => "embrace_with_compassion",
            TransmutationAction::TransmuteWithLove => "transmute_with_love",
            TransmutationAction::Redirect => "redirect",
        }
    }
}

impl fmt::Display for TransmutationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response sent back for a blocked packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmutation {
    pub action: TransmutationAction,
    pub message: String,
}

impl Transmutation {
    pub fn new(action: TransmutationAction, message: impl Into<String>) -> Self {
        Self {
            action,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityVerdict {
    pub allowed: bool,
    /// Sender/receiver field compatibility in `[0, 1]`.
    pub field_compatibility: f64,
    /// Present if and only if the packet was blocked.
    pub transmutation: Option<Transmutation>,
    pub recommendations: Vec<String>,
}

impl SecurityVerdict {
    fn blocked(field_compatibility: f64, transmutation: Transmutation) -> Self {
        Self {
            allowed: false,
            field_compatibility,
            transmutation: Some(transmutation),
            recommendations: Vec::new(),
        }
    }
}

/// Markers of hostile intent, matched as lower-cased substrings.
const HOSTILE_MARKERS: [&str; 12] = [
    "manipulat", "coerc", "control", "force", "trick", "deceive", "extract", "exploit",
    "dominate", "isolate", "curse", "hex",
];
/// Markers of fear, matched as lower-cased substrings.
const FEAR_MARKERS: [&str; 4] = ["fear", "panic", "escape", "danger"];
/// Geometry vocabulary that contains a marker without meaning it.
const BENIGN_WORDS: [&str; 2] = ["hexagon", "hexagram"];

#[derive(Debug, Clone, Default)]
pub struct SecurityGate {
    config: SecurityConfig,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    pub fn check(&self, packet: &Packet, ctx: &SecurityContext) -> SecurityVerdict {
        let compatibility = field_compatibility(packet, ctx);

        // ── Intent ──────────────────────────────────────────────────
        let texts = intent_texts(packet);
        if let Some(marker) = find_marker(&texts, &HOSTILE_MARKERS) {
            return SecurityVerdict::blocked(
                compatibility,
                Transmutation::new(
                    TransmutationAction::TransmuteWithLove,
                    format!(
                        "intention '{marker}' is met with love and returned; \
                         send again from care for the other's free will"
                    ),
                ),
            );
        }
        if find_marker(&texts, &FEAR_MARKERS).is_some() {
            return SecurityVerdict::blocked(
                compatibility,
                Transmutation::new(
                    TransmutationAction::EmbraceWithCompassion,
                    "fear is held with compassion; breathe and return when grounded",
                ),
            );
        }
        if packet.field.coherence < self.config.unconscious_coherence
            && packet.intention.urgency > self.config.unconscious_urgency
        {
            return SecurityVerdict::blocked(
                compatibility,
                Transmutation::new(
                    TransmutationAction::EmbraceWithCompassion,
                    "urgency without coherence is held with compassion; center first",
                ),
            );
        }

        // ── Thresholds ──────────────────────────────────────────────
        if packet.field.coherence < self.config.min_packet_coherence {
            return SecurityVerdict::blocked(
                compatibility,
                Transmutation::new(
                    TransmutationAction::Redirect,
                    format!(
                        "field coherence {:.2} is below {:.2}; raise coherence and resend",
                        packet.field.coherence, self.config.min_packet_coherence
                    ),
                ),
            );
        }
        if packet.field.field_strength < self.config.min_field_strength {
            return SecurityVerdict::blocked(
                compatibility,
                Transmutation::new(
                    TransmutationAction::Redirect,
                    format!(
                        "field strength {:.2} is below {:.2}",
                        packet.field.field_strength, self.config.min_field_strength
                    ),
                ),
            );
        }

        // ── Direct address ──────────────────────────────────────────
        if let Target::Peer(_) = packet.intention.target {
            if let Some(resonance) = ctx.peer_resonance {
                if resonance < self.config.direct_resonance_floor {
                    return SecurityVerdict::blocked(
                        compatibility,
                        Transmutation::new(
                            TransmutationAction::Redirect,
                            format!(
                                "resonance {resonance:.0} is too low for direct address; \
                                 reach out through the open field"
                            ),
                        ),
                    );
                }
            }
        }

        // ── Compatibility ───────────────────────────────────────────
        if compatibility < self.config.block_compatibility {
            return SecurityVerdict::blocked(
                compatibility,
                Transmutation::new(
                    TransmutationAction::Redirect,
                    format!("field compatibility {compatibility:.2} is too low; try another peer"),
                ),
            );
        }

        let mut recommendations = Vec::new();
        if compatibility < self.config.advise_compatibility {
            recommendations.push(format!(
                "field compatibility {compatibility:.2} is marginal; attune before deepening"
            ));
        }
        if ctx.prior_blocks > 0 {
            recommendations.push(format!(
                "{} earlier packet(s) from this peer were held",
                ctx.prior_blocks
            ));
        }

        SecurityVerdict {
            allowed: true,
            field_compatibility: compatibility,
            transmutation: None,
            recommendations,
        }
    }
}

/// Compatibility of the sender's field with the local one, in `[0, 1]`.
pub fn field_compatibility(packet: &Packet, ctx: &SecurityContext) -> f64 {
    let strength = packet.field.field_strength;
    let strength_compat = if ctx.local_strength <= 0.0 {
        0.5
    } else {
        let ratio = strength / ctx.local_strength;
        if !(0.5..=2.0).contains(&ratio) {
            0.5
        } else {
            1.0
        }
    };
    let coherence_compat = 1.0 - (packet.field.coherence - ctx.local_coherence).abs();
    let boundary = boundary_respect(&packet.covenant.commitments);

    crate::types::clamp_unit(0.3 * strength_compat + 0.4 * coherence_compat + 0.3 * boundary)
}

fn boundary_respect(commitments: &[String]) -> f64 {
    let mut respect: f64 = 1.0;
    for c in commitments {
        match c.as_str() {
            "no_boundaries" => respect *= 0.3,
            "honor_boundaries" => respect *= 1.2,
            "consent_based" => respect *= 1.1,
            _ => {}
        }
    }
    respect.min(1.0)
}

/// Lower-cased purpose, covenant intention and blessing, with benign
/// geometry words blanked out.
fn intent_texts(packet: &Packet) -> [String; 3] {
    [
        &packet.intention.purpose,
        &packet.covenant.intention,
        &packet.covenant.blessing,
    ]
    .map(|text| {
        BENIGN_WORDS
            .iter()
            .fold(text.to_lowercase(), |acc, word| acc.replace(*word, " "))
    })
}

/// First marker contained in any of `texts`.
fn find_marker(texts: &[String], markers: &[&'static str]) -> Option<&'static str> {
    markers
        .iter()
        .copied()
        .find(|marker| texts.iter().any(|t| t.contains(marker)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::SeededEntropy;
    use crate::packet::PacketBuilder;

    fn ctx() -> SecurityContext {
        SecurityContext {
            local_coherence: 0.7,
            local_strength: 0.7,
            peer_resonance: None,
            prior_blocks: 0,
        }
    }

    fn packet(b: PacketBuilder) -> Packet {
        b.content(serde_json::json!({"text": "hi"}))
            .build_at(&mut SeededEntropy::new(2), 100)
    }

    #[test]
    fn kind_packet_passes() {
        let p = packet(PacketBuilder::new("offer_healing").coherence(0.7));
        let v = SecurityGate::default().check(&p, &ctx());
        assert!(v.allowed);
        assert!(v.transmutation.is_none());
        assert!(v.field_compatibility > 0.9);
    }

    #[test]
    fn hostile_purpose_is_transmuted() {
        let p = packet(PacketBuilder::new("control_others").coherence(0.9));
        let v = SecurityGate::default().check(&p, &ctx());
        assert!(!v.allowed);
        let t = v.transmutation.unwrap();
        assert_eq!(t.action, TransmutationAction::TransmuteWithLove);
        assert!(t.message.contains("control"));
    }

    #[test]
    fn hostile_blessing_is_transmuted() {
        let p = packet(
            PacketBuilder::new("share_presence")
                .coherence(0.9)
                .blessing("a curse upon thee"),
        );
        let v = SecurityGate::default().check(&p, &ctx());
        assert_eq!(
            v.transmutation.map(|t| t.action),
            Some(TransmutationAction::TransmuteWithLove)
        );
    }

    #[test]
    fn hexagon_is_not_a_hex() {
        let p = packet(
            PacketBuilder::new("share_presence")
                .coherence(0.7)
                .blessing("a hexagon of light within a Hexagram"),
        );
        assert!(SecurityGate::default().check(&p, &ctx()).allowed);

        let p = packet(
            PacketBuilder::new("share_presence")
                .coherence(0.7)
                .blessing("a hexagon and a hex"),
        );
        assert!(!SecurityGate::default().check(&p, &ctx()).allowed);
    }

    #[test]
    fn markers_inside_compound_words_are_transmuted() {
        for purpose in ["remotecontrol_peers", "selfcontrol", "mindcontrol", "Reinforce", "outcursed"] {
            let p = packet(PacketBuilder::new(purpose).coherence(0.9));
            let v = SecurityGate::default().check(&p, &ctx());
            assert_eq!(
                v.transmutation.map(|t| t.action),
                Some(TransmutationAction::TransmuteWithLove),
                "{purpose}"
            );
        }
        let p = packet(
            PacketBuilder::new("share_presence")
                .coherence(0.9)
                .covenant_intention("quietly_Dominate"),
        );
        assert!(!SecurityGate::default().check(&p, &ctx()).allowed);
    }

    #[test]
    fn default_blessings_never_trip_the_gate() {
        for purpose in [
            "share_presence",
            "seek_wisdom",
            "offer_healing",
            "celebrate_together",
            "serve_collective",
            "request_consent",
            "establish_presence",
        ] {
            let p = packet(PacketBuilder::new(purpose).coherence(0.7));
            assert!(SecurityGate::default().check(&p, &ctx()).allowed, "{purpose}");
        }
    }

    #[test]
    fn fear_is_embraced() {
        for purpose in ["fear_of_loss", "panicking", "escape_now", "in_danger", "escape_danger"] {
            let p = packet(PacketBuilder::new(purpose).coherence(0.8));
            let v = SecurityGate::default().check(&p, &ctx());
            assert_eq!(
                v.transmutation.map(|t| t.action),
                Some(TransmutationAction::EmbraceWithCompassion),
                "{purpose}"
            );
        }
    }

    #[test]
    fn only_listed_fears_are_embraced() {
        for purpose in ["terror_watch", "threat_model"] {
            let p = packet(PacketBuilder::new(purpose).coherence(0.8));
            assert!(SecurityGate::default().check(&p, &ctx()).allowed, "{purpose}");
        }
    }

    #[test]
    fn unconscious_urgency_is_embraced() {
        let p = packet(PacketBuilder::new("share_presence").coherence(0.1).urgency(0.95));
        let v = SecurityGate::default().check(&p, &ctx());
        assert_eq!(
            v.transmutation.map(|t| t.action),
            Some(TransmutationAction::EmbraceWithCompassion)
        );
    }

    #[test]
    fn low_coherence_is_redirected() {
        let p = packet(PacketBuilder::new("share_presence").coherence(0.25));
        let v = SecurityGate::default().check(&p, &ctx());
        assert_eq!(
            v.transmutation.map(|t| t.action),
            Some(TransmutationAction::Redirect)
        );
    }

    #[test]
    fn weak_field_is_redirected() {
        let p = packet(PacketBuilder::new("share_presence").coherence(0.7).field_strength(0.05));
        let v = SecurityGate::default().check(&p, &ctx());
        assert!(!v.allowed);
        assert_eq!(v.transmutation.unwrap().action, TransmutationAction::Redirect);
    }

    #[test]
    fn direct_address_needs_resonance() {
        let p = packet(PacketBuilder::new("seek_wisdom").coherence(0.7).to_peer("me"));
        let low = SecurityContext {
            peer_resonance: Some(20.0),
            ..ctx()
        };
        assert!(!SecurityGate::default().check(&p, &low).allowed);

        let open = packet(PacketBuilder::new("seek_wisdom").coherence(0.7));
        assert!(SecurityGate::default().check(&open, &low).allowed);

        let unknown = SecurityContext {
            peer_resonance: None,
            ..ctx()
        };
        assert!(SecurityGate::default().check(&p, &unknown).allowed);
    }

    #[test]
    fn no_boundaries_lowers_compatibility() {
        let respectful = packet(PacketBuilder::new("share_presence").coherence(0.7));
        let careless = packet(
            PacketBuilder::new("share_presence")
                .coherence(0.7)
                .commitments(vec!["no_boundaries".into()]),
        );
        let a = field_compatibility(&respectful, &ctx());
        let b = field_compatibility(&careless, &ctx());
        assert!((a - b - 0.3 * 0.7).abs() < 1e-9);
    }

    #[test]
    fn incompatible_field_is_redirected_and_marginal_is_advised() {
        // strength ratio 3 -> 0.5, coherence gap 0.6, no boundaries
        let far = packet(
            PacketBuilder::new("share_presence")
                .coherence(0.9)
                .field_strength(0.9)
                .commitments(vec!["no_boundaries".into()]),
        );
        let local = SecurityContext {
            local_coherence: 0.3,
            local_strength: 0.3,
            ..ctx()
        };
        // 0.15 + 0.4 * 0.4 + 0.09 ≈ 0.40
        let v = SecurityGate::default().check(&far, &local);
        assert!(v.allowed);

        let farther = SecurityContext {
            local_coherence: 0.0,
            local_strength: 0.3,
            ..ctx()
        };
        // 0.15 + 0.04 + 0.09 = 0.28 -> advised
        let v = SecurityGate::default().check(&far, &farther);
        assert!(v.allowed);
        assert!(!v.recommendations.is_empty());

        let strict = SecurityGate::new(SecurityConfig {
            block_compatibility: 0.3,
            ..SecurityConfig::default()
        });
        let v = strict.check(&far, &farther);
        assert!(!v.allowed);
        assert_eq!(v.transmutation.unwrap().action, TransmutationAction::Redirect);
    }

    #[test]
    fn action_wire_names() {
        assert_eq!(TransmutationAction::TransmuteWithLove.to_string(), "transmute_with_love");
        assert_eq!(
            serde_json::to_value(TransmutationAction::EmbraceWithCompassion).unwrap(),
            "embrace_with_compassion"
        );
    }
}
