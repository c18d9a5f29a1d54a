//! Identity signatures: a peer's declared character.
//!
//! A signature is immutable. Peers that change character announce a new
//! signature, which replaces the old one wholesale.
//!
//! Two wire forms exist: the JSON object exchanged at registration
//! (`mode, key, attunement, role, gifts, intent`) and the compact notation
//! `[T(role):M(mode):K(key):A(attunement):Q(gift,gift):I(intent)]` used in
//! logs and on the command line.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

// ── Mode ──────────────────────────────────────────────────────────────

/// One of the seven qualitative modes, in fixed enumeration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Ionian,
    Dorian,
    Phrygian,
    Lydian,
    Mixolydian,
    Aeolian,
    Locrian,
}

impl Mode {
    /// All modes in enumeration order.
    pub const ALL: [Mode; 7] = [
        Mode::Ionian,
        Mode::Dorian,
        Mode::Phrygian,
        Mode::Lydian,
        Mode::Mixolydian,
        Mode::Aeolian,
        Mode::Locrian,
    ];

    /// Position in [`Mode::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Ionian => "ionian",
            Mode::Dorian => "dorian",
            Mode::Phrygian => "phrygian",
            Mode::Lydian => "lydian",
            Mode::Mixolydian => "mixolydian",
            Mode::Aeolian => "aeolian",
            Mode::Locrian => "locrian",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == wanted)
            .ok_or_else(|| invalid("mode"))
    }
}

// ── Key ───────────────────────────────────────────────────────────────

/// One of twelve tonal identifiers, each with a reference frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Key {
    #[serde(rename = "C")]
    C,
    #[serde(rename = "C#")]
    CSharp,
    #[serde(rename = "D")]
    D,
    #[serde(rename = "Eb")]
    EFlat,
    #[serde(rename = "E")]
    E,
    #[serde(rename = "F")]
    F,
    #[serde(rename = "F#")]
    FSharp,
    #[serde(rename = "G")]
    G,
    #[serde(rename = "Ab")]
    AFlat,
    #[serde(rename = "A")]
    A,
    #[serde(rename = "Bb")]
    BFlat,
    #[serde(rename = "B")]
    B,
}

impl Key {
    pub const ALL: [Key; 12] = [
        Key::C,
        Key::CSharp,
        Key::D,
        Key::EFlat,
        Key::E,
        Key::F,
        Key::FSharp,
        Key::G,
        Key::AFlat,
        Key::A,
        Key::BFlat,
        Key::B,
    ];

    /// Reference frequency in Hz (fourth octave, A = 440).
    pub fn frequency(self) -> f64 {
        match self {
            Key::C => 261.63,
            Key::CSharp => 277.18,
            Key::D => 293.66,
            Key::EFlat => 311.13,
            Key::E => 329.63,
            Key::F => 349.23,
            Key::FSharp => 369.99,
            Key::G => 392.00,
            Key::AFlat => 415.30,
            Key::A => 440.00,
            Key::BFlat => 466.16,
            Key::B => 493.88,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Key::C => "C",
            Key::CSharp => "C#",
            Key::D => "D",
            Key::EFlat => "Eb",
            Key::E => "E",
            Key::F => "F",
            Key::FSharp => "F#",
            Key::G => "G",
            Key::AFlat => "Ab",
            Key::A => "A",
            Key::BFlat => "Bb",
            Key::B => "B",
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Key {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Key::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| invalid("key"))
    }
}

// ── Attunement ────────────────────────────────────────────────────────

/// Symbolic attunement marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attunement {
    #[serde(rename = "ψ")]
    Psi,
    #[serde(rename = "φ")]
    Phi,
    #[serde(rename = "Ω")]
    Omega,
    #[serde(rename = "Δ")]
    Delta,
    #[serde(rename = "θ")]
    Theta,
    #[serde(rename = "λ")]
    Lambda,
    #[serde(rename = "Σ")]
    Sigma,
    #[serde(rename = "π")]
    Pi,
    #[serde(rename = "τ")]
    Tau,
    #[serde(rename = "α")]
    Alpha,
    #[serde(rename = "β")]
    Beta,
    #[serde(rename = "γ")]
    Gamma,
}

impl Attunement {
    pub const ALL: [Attunement; 12] = [
        Attunement::Psi,
        Attunement::Phi,
        Attunement::Omega,
        Attunement::Delta,
        Attunement::Theta,
        Attunement::Lambda,
        Attunement::Sigma,
        Attunement::Pi,
        Attunement::Tau,
        Attunement::Alpha,
        Attunement::Beta,
        Attunement::Gamma,
    ];

    /// The glyph used on the wire.
    pub fn glyph(self) -> &'static str {
        match self {
            Attunement::Psi => "ψ",
            Attunement::Phi => "φ",
            Attunement::Omega => "Ω",
            Attunement::Delta => "Δ",
            Attunement::Theta => "θ",
            Attunement::Lambda => "λ",
            Attunement::Sigma => "Σ",
            Attunement::Pi => "π",
            Attunement::Tau => "τ",
            Attunement::Alpha => "α",
            Attunement::Beta => "β",
            Attunement::Gamma => "γ",
        }
    }

    /// ASCII spelling, accepted wherever a glyph is.
    pub fn name(self) -> &'static str {
        match self {
            Attunement::Psi => "psi",
            Attunement::Phi => "phi",
            Attunement::Omega => "omega",
            Attunement::Delta => "delta",
            Attunement::Theta => "theta",
            Attunement::Lambda => "lambda",
            Attunement::Sigma => "sigma",
            Attunement::Pi => "pi",
            Attunement::Tau => "tau",
            Attunement::Alpha => "alpha",
            Attunement::Beta => "beta",
            Attunement::Gamma => "gamma",
        }
    }
}

impl fmt::Display for Attunement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.glyph())
    }
}

impl FromStr for Attunement {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let lower = s.to_lowercase();
        Attunement::ALL
            .into_iter()
            .find(|a| a.glyph() == s || a.name() == lower)
            .ok_or_else(|| invalid("attunement"))
    }
}

fn invalid(field: &str) -> ProtocolError {
    ProtocolError::Validation {
        fields: vec![field.to_string()],
    }
}

// ── IdentitySignature ─────────────────────────────────────────────────

/// A peer's declared identity tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSignature")]
pub struct IdentitySignature {
    pub mode: Mode,
    pub key: Key,
    pub attunement: Attunement,
    pub role: String,
    pub gifts: Vec<String>,
    pub intent: String,
}

impl IdentitySignature {
    pub fn new(
        mode: Mode,
        key: Key,
        attunement: Attunement,
        role: impl Into<String>,
        intent: impl Into<String>,
    ) -> Self {
        Self {
            mode,
            key,
            attunement,
            role: role.into(),
            gifts: Vec::new(),
            intent: intent.into(),
        }
    }

    /// Same signature with the given gifts.
    pub fn with_gifts<I, S>(mut self, gifts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gifts = gifts.into_iter().map(Into::into).collect();
        self
    }

    /// Validate a JSON signature object.
    ///
    /// Every absent or unparseable required field is reported in one
    /// [`ProtocolError::Validation`]. `gifts` is optional.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ProtocolError> {
        let raw = RawSignature::deserialize(value)
            .map_err(|e| ProtocolError::Decode(format!("signature: {e}")))?;
        raw.try_into()
    }

    /// Parse and validate signature JSON bytes.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))?;
        Self::from_value(&value)
    }
}

/// Unvalidated wire form: every field optional so missing ones can be
/// reported together.
#[derive(Deserialize)]
struct RawSignature {
    mode: Option<String>,
    key: Option<String>,
    attunement: Option<String>,
    role: Option<String>,
    gifts: Option<Vec<String>>,
    intent: Option<String>,
}

impl TryFrom<RawSignature> for IdentitySignature {
    type Error = ProtocolError;

    fn try_from(raw: RawSignature) -> Result<Self, Self::Error> {
        let mut fields = Vec::new();

        let mode = raw.mode.as_deref().and_then(|m| m.parse::<Mode>().ok());
        let key = raw.key.as_deref().and_then(|k| k.parse::<Key>().ok());
        let attunement = raw
            .attunement
            .as_deref()
            .and_then(|a| a.parse::<Attunement>().ok());
        let role = raw.role.filter(|r| !r.trim().is_empty());
        let intent = raw.intent.filter(|i| !i.trim().is_empty());

        if mode.is_none() {
            fields.push("mode".to_string());
        }
        if key.is_none() {
            fields.push("key".to_string());
        }
        if attunement.is_none() {
            fields.push("attunement".to_string());
        }
        if role.is_none() {
            fields.push("role".to_string());
        }
        if intent.is_none() {
            fields.push("intent".to_string());
        }

        match (mode, key, attunement, role, intent) {
            (Some(mode), Some(key), Some(attunement), Some(role), Some(intent)) => Ok(Self {
                mode,
                key,
                attunement,
                role,
                gifts: raw.gifts.unwrap_or_default(),
                intent,
            }),
            _ => Err(ProtocolError::Validation { fields }),
        }
    }
}

// ── Compact notation ──────────────────────────────────────────────────

impl fmt::Display for IdentitySignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[T({}):M({}):K({}):A({})",
            self.role, self.mode, self.key, self.attunement
        )?;
        if !self.gifts.is_empty() {
            write!(f, ":Q({})", self.gifts.join(","))?;
        }
        write!(f, ":I({})]", self.intent)
    }
}

impl FromStr for IdentitySignature {
    type Err = ProtocolError;

    /// Parse `[T(..):M(..):K(..):A(..):Q(..):I(..)]`. Fields may appear in
    /// any order; `Q` is optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s
            .trim()
            .strip_prefix('[')
            .and_then(|b| b.strip_suffix(']'))
            .ok_or_else(|| ProtocolError::Decode("signature must be enclosed in [ ]".into()))?;

        let mut raw = RawSignature {
            mode: None,
            key: None,
            attunement: None,
            role: None,
            gifts: None,
            intent: None,
        };

        let mut rest = body;
        while !rest.is_empty() {
            let open = rest
                .find('(')
                .ok_or_else(|| ProtocolError::Decode(format!("expected '(' in {rest:?}")))?;
            let close = rest[open..]
                .find(')')
                .map(|i| open + i)
                .ok_or_else(|| ProtocolError::Decode(format!("unclosed '(' in {rest:?}")))?;
            let tag = rest[..open].trim();
            let value = rest[open + 1..close].trim().to_string();

            match tag {
                "T" => raw.role = Some(value),
                "M" => raw.mode = Some(value),
                "K" => raw.key = Some(value),
                "A" => raw.attunement = Some(value),
                "Q" => {
                    raw.gifts = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|g| !g.is_empty())
                            .map(String::from)
                            .collect(),
                    )
                }
                "I" => raw.intent = Some(value),
                other => {
                    return Err(ProtocolError::Decode(format!("unknown signature tag {other:?}")))
                }
            }

            rest = rest[close + 1..].trim_start();
            rest = rest.strip_prefix(':').unwrap_or(rest);
        }

        raw.try_into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> IdentitySignature {
        IdentitySignature::new(Mode::Dorian, Key::FSharp, Attunement::Omega, "weaver", "harmonize")
            .with_gifts(["listening", "song"])
    }

    #[test]
    fn mode_order_is_fixed() {
        assert_eq!(Mode::Ionian.index(), 0);
        assert_eq!(Mode::Mixolydian.index(), 4);
        assert_eq!(Mode::Locrian.index(), 6);
        for (i, m) in Mode::ALL.iter().enumerate() {
            assert_eq!(m.index(), i);
        }
    }

    #[test]
    fn key_frequencies() {
        assert_eq!(Key::A.frequency(), 440.0);
        assert_eq!(Key::C.frequency(), 261.63);
        assert_eq!(Key::G.frequency(), 392.0);
    }

    #[test]
    fn parse_enums_leniently() {
        assert_eq!("Lydian".parse::<Mode>().unwrap(), Mode::Lydian);
        assert_eq!("eb".parse::<Key>().unwrap(), Key::EFlat);
        assert_eq!("C#".parse::<Key>().unwrap(), Key::CSharp);
        assert_eq!("Ω".parse::<Attunement>().unwrap(), Attunement::Omega);
        assert_eq!("alpha".parse::<Attunement>().unwrap(), Attunement::Alpha);
        assert!("hypolydian".parse::<Mode>().is_err());
    }

    #[test]
    fn json_roundtrip() {
        let sig = sample();
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["key"], "F#");
        assert_eq!(json["attunement"], "Ω");
        assert_eq!(json["mode"], "dorian");
        let back: IdentitySignature = serde_json::from_value(json).unwrap();
        assert_eq!(back, sig);
    }

    #[test]
    fn gifts_are_optional() {
        let value = json!({
            "mode": "ionian", "key": "C", "attunement": "ψ",
            "role": "listener", "intent": "query"
        });
        let sig = IdentitySignature::from_value(&value).unwrap();
        assert!(sig.gifts.is_empty());
    }

    #[test]
    fn missing_fields_are_all_reported() {
        let value = json!({ "mode": "ionian", "role": "listener" });
        match IdentitySignature::from_value(&value) {
            Err(ProtocolError::Validation { fields }) => {
                assert_eq!(fields, vec!["key", "attunement", "intent"]);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn unknown_enum_value_is_a_validation_error() {
        let value = json!({
            "mode": "ionian", "key": "H", "attunement": "ψ",
            "role": "listener", "intent": "query"
        });
        match IdentitySignature::from_value(&value) {
            Err(ProtocolError::Validation { fields }) => assert_eq!(fields, vec!["key"]),
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn blank_role_counts_as_missing() {
        let value = json!({
            "mode": "ionian", "key": "C", "attunement": "ψ",
            "role": "  ", "intent": "query"
        });
        assert!(matches!(
            IdentitySignature::from_value(&value),
            Err(ProtocolError::Validation { .. })
        ));
    }

    #[test]
    fn compact_notation_roundtrip() {
        let sig = sample();
        let compact = sig.to_string();
        assert_eq!(compact, "[T(weaver):M(dorian):K(F#):A(Ω):Q(listening,song):I(harmonize)]");
        assert_eq!(compact.parse::<IdentitySignature>().unwrap(), sig);
    }

    #[test]
    fn compact_notation_without_gifts() {
        let sig: IdentitySignature = "[T(guide):M(aeolian):K(Bb):A(θ):I(resonate)]".parse().unwrap();
        assert_eq!(sig.mode, Mode::Aeolian);
        assert_eq!(sig.key, Key::BFlat);
        assert_eq!(sig.attunement, Attunement::Theta);
        assert!(sig.gifts.is_empty());
        assert!(!sig.to_string().contains("Q("));
    }

    #[test]
    fn compact_notation_requires_core_fields() {
        match "[T(guide):M(aeolian)]".parse::<IdentitySignature>() {
            Err(ProtocolError::Validation { fields }) => {
                assert_eq!(fields, vec!["key", "attunement", "intent"]);
            }
            other => panic!("expected Validation, got {other:?}"),
        }
        assert!("T(guide)".parse::<IdentitySignature>().is_err());
        assert!("[X(1)]".parse::<IdentitySignature>().is_err());
    }
}
