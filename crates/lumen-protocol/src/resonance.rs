//! Signature resonance: pairwise compatibility between two identity
//! signatures, on a 0–100 scale.
//!
//! Four independent sub-scores are summed:
//!
//! | term        | weight | rule |
//! |-------------|--------|------|
//! | mode        | 40     | 40 if equal, else `max(0, 40 − 10·d)` with `d` the distance between positions in [`Mode::ALL`] |
//! | key         | 30     | 30 if the frequency ratio is within 0.01 of a consonant ratio, else `max(0, 30 − 20·|r − 1.5|)` |
//! | attunement  | 20     | 20 if equal, 15 for a complementary pair, else 0 |
//! | intent      | 10     | 10 if equal, 5 if `(a, b)` is in the directional affinity table, else 0 |
//!
//! The intent term is the only one that can differ between
//! `resonance(a, b)` and `resonance(b, a)`.

use serde::Serialize;

use crate::signature::{Attunement, IdentitySignature, Key, Mode};
use crate::types::clamp_percent;

pub const MODE_WEIGHT: f64 = 40.0;
pub const KEY_WEIGHT: f64 = 30.0;
pub const ATTUNEMENT_WEIGHT: f64 = 20.0;
pub const INTENT_WEIGHT: f64 = 10.0;

/// Default floor for [`rank_peers`]: peers must score strictly above it.
pub const DISCOVERY_FLOOR: f64 = 30.0;
/// Default result limit for [`rank_peers`].
pub const DISCOVERY_LIMIT: usize = 5;

const CONSONANT_RATIOS: [f64; 5] = [1.0, 2.0, 1.5, 4.0 / 3.0, 3.0 / 2.0];
const RATIO_TOLERANCE: f64 = 0.01;

const COMPLEMENTARY: [(Attunement, Attunement); 2] = [
    (Attunement::Alpha, Attunement::Omega),
    (Attunement::Delta, Attunement::Theta),
];

/// Per-term resonance scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResonanceBreakdown {
    pub mode: f64,
    pub key: f64,
    pub attunement: f64,
    pub intent: f64,
}

impl ResonanceBreakdown {
    /// Sum of all terms, clamped to `[0, 100]`.
    pub fn total(&self) -> f64 {
        clamp_percent(self.mode + self.key + self.attunement + self.intent)
    }
}

/// Score every term for `a` looking at `b`.
pub fn breakdown(a: &IdentitySignature, b: &IdentitySignature) -> ResonanceBreakdown {
    ResonanceBreakdown {
        mode: mode_score(a.mode, b.mode),
        key: key_score(a.key, b.key),
        attunement: attunement_score(a.attunement, b.attunement),
        intent: intent_score(&a.intent, &b.intent),
    }
}

/// Resonance of `a` with `b`, in `[0, 100]`.
pub fn resonance(a: &IdentitySignature, b: &IdentitySignature) -> f64 {
    breakdown(a, b).total()
}

pub fn mode_score(a: Mode, b: Mode) -> f64 {
    if a == b {
        return MODE_WEIGHT;
    }
    let d = a.index().abs_diff(b.index()) as f64;
    (MODE_WEIGHT - 10.0 * d).max(0.0)
}

pub fn key_score(a: Key, b: Key) -> f64 {
    let (fa, fb) = (a.frequency(), b.frequency());
    let ratio = fa.max(fb) / fa.min(fb);
    if CONSONANT_RATIOS
        .iter()
        .any(|c| (ratio - c).abs() <= RATIO_TOLERANCE)
    {
        return KEY_WEIGHT;
    }
    (KEY_WEIGHT - 20.0 * (ratio - 1.5).abs()).max(0.0)
}

pub fn attunement_score(a: Attunement, b: Attunement) -> f64 {
    if a == b {
        return ATTUNEMENT_WEIGHT;
    }
    let complementary = COMPLEMENTARY
        .iter()
        .any(|&(x, y)| (a == x && b == y) || (a == y && b == x));
    if complementary {
        15.0
    } else {
        0.0
    }
}

/// Directional: looks up `b` in the affinity list of `a` only.
/// A blank intent on either side scores nothing, even against itself.
pub fn intent_score(a: &str, b: &str) -> f64 {
    if a.trim().is_empty() || b.trim().is_empty() {
        return 0.0;
    }
    if a == b {
        return INTENT_WEIGHT;
    }
    if intent_affinity(a).contains(&b) {
        5.0
    } else {
        0.0
    }
}

/// Intents that `intent` has affinity toward.
pub fn intent_affinity(intent: &str) -> &'static [&'static str] {
    match intent {
        "query" => &["broadcast", "resonate"],
        "broadcast" => &["query", "harmonize"],
        "resonate" => &["query", "harmonize", "transform"],
        "harmonize" => &["broadcast", "resonate"],
        "transform" => &["resonate"],
        _ => &[],
    }
}

/// Rank candidate peers by resonance with `sig`.
///
/// Keeps peers scoring strictly above `floor`, sorted best first, at most
/// `limit` of them. Equal scores keep their input order.
pub fn rank_peers<'a, K, I>(
    sig: &IdentitySignature,
    peers: I,
    floor: f64,
    limit: usize,
) -> Vec<(K, f64)>
where
    I: IntoIterator<Item = (K, &'a IdentitySignature)>,
{
    let mut scored: Vec<(K, f64)> = peers
        .into_iter()
        .map(|(k, peer)| {
            let score = resonance(sig, peer);
            (k, score)
        })
        .filter(|(_, score)| *score > floor)
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);
    scored
}
