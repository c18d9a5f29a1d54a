//! Shared constants and small numeric helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix time in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// The nine solfeggio frequencies, the default harmonic set of a packet.
pub const SOLFEGGIO: [f64; 9] = [174.0, 285.0, 396.0, 417.0, 528.0, 639.0, 741.0, 852.0, 963.0];

/// Frequencies a packet's harmonics are compared against.
pub const REFERENCE_HARMONICS: [f64; 11] = [
    174.0, 285.0, 396.0, 417.0, 432.0, 528.0, 639.0, 741.0, 852.0, 864.0, 963.0,
];

/// Golden ratio.
pub const PHI: f64 = 1.618_033_988_749_895;

/// Geometry tags the coherence engine recognizes.
pub const RECOGNIZED_GEOMETRIES: [&str; 5] = [
    "flower_of_life",
    "seed_of_life",
    "metatrons_cube",
    "sri_yantra",
    "vesica_piscis",
];

/// Default geometry tag for new packets.
pub const DEFAULT_GEOMETRY: &str = "flower_of_life";

/// Clamp to `[0, 1]`. NaN becomes 0.
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Clamp to `[0, 100]`. NaN becomes 0.
pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
