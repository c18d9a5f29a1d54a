//! The layered packet: the unit of transmission.
//!
//! Nine independent layers, each owned by the packet. A packet is built
//! once by its sender ([`PacketBuilder`]) and never edited afterwards,
//! except for [`Metadata`], which only grows as the packet crosses hops
//! ([`Packet::record_hop`]).
//!
//! Every score-like number is clamped on construction and again on decode.

mod builder;
mod codec;

pub use builder::PacketBuilder;
pub use codec::{decode, encode, Decoded};

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{clamp_unit, DEFAULT_GEOMETRY, SOLFEGGIO};

/// Number of dimensions in an intention vector.
pub const INTENTION_DIMENSIONS: usize = 5;

/// Default hop budget for new packets.
pub const DEFAULT_TTL: u32 = 7;

// ── Packet ────────────────────────────────────────────────────────────

/// A complete packet. Top-level JSON keys are exactly the nine layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Packet {
    pub origin: OriginLayer,
    pub field: FieldLayer,
    pub covenant: CovenantLayer,
    pub intention: IntentionLayer,
    pub resonance: ResonanceLayer,
    pub presence: PresenceLayer,
    pub meaning: MeaningLayer,
    pub embodiment: EmbodimentLayer,
    pub metadata: Metadata,
}

impl Packet {
    /// Packet identifier.
    pub fn id(&self) -> Uuid {
        self.metadata.packet_id
    }

    /// Declared purpose tag, used for routing.
    pub fn purpose(&self) -> &str {
        &self.intention.purpose
    }

    /// Whether the packet is addressed to the open field.
    pub fn is_broadcast(&self) -> bool {
        matches!(self.intention.target, Target::OpenField)
    }

    /// Number of hops recorded so far.
    pub fn hops(&self) -> usize {
        self.metadata.route_path.len()
    }

    /// Whether the hop budget is spent. Such packets are still processed
    /// where they land but never relayed further.
    pub fn ttl_exhausted(&self) -> bool {
        self.metadata
            .ttl
            .is_some_and(|ttl| self.hops() >= ttl as usize)
    }

    /// Append one hop. Route path and coherence history always grow
    /// together.
    pub fn record_hop(&mut self, node: impl Into<String>, coherence: f64) {
        self.metadata.route_path.push(node.into());
        self.metadata.coherence_history.push(clamp_unit(coherence));
    }

    /// Re-apply every range invariant. Idempotent.
    pub(crate) fn normalize(&mut self) {
        self.origin.context.field_coherence = clamp_unit(self.origin.context.field_coherence);
        self.field.coherence = clamp_unit(self.field.coherence);
        self.field.field_strength = clamp_unit(self.field.field_strength);
        self.field.harmonics.retain(|h| h.is_finite() && *h > 0.0);
        self.intention.urgency = clamp_unit(self.intention.urgency);
        self.intention.service_orientation = clamp_unit(self.intention.service_orientation);
        for v in &mut self.intention.vector {
            *v = clamp_unit(*v);
        }
        self.resonance.coherence_required = clamp_unit(self.resonance.coherence_required);
        self.presence.quality = self.presence.quality.clamped();
        for v in self.meaning.translation.values_mut() {
            *v = clamp_unit(*v);
        }
        for c in &mut self.metadata.coherence_history {
            *c = clamp_unit(*c);
        }
    }
}

// ── Origin ────────────────────────────────────────────────────────────

/// Uniqueness and audit information. Never used for ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OriginLayer {
    /// Hex sha256 over fresh entropy and the creation time.
    pub signature: String,
    /// Creation time, Unix milliseconds.
    pub created_at: u64,
    pub context: CreationContext,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreationContext {
    /// Identifier of the creating node.
    pub creator: String,
    /// Sender coherence at creation.
    pub field_coherence: f64,
    pub kairos: Kairos,
}

/// Qualitative moment of creation, derived from sender coherence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kairos {
    PeakCoherence,
    Flowing,
    Building,
    Gathering,
}

impl Kairos {
    pub fn from_coherence(coherence: f64) -> Self {
        if coherence > 0.9 {
            Kairos::PeakCoherence
        } else if coherence > 0.7 {
            Kairos::Flowing
        } else if coherence > 0.5 {
            Kairos::Building
        } else {
            Kairos::Gathering
        }
    }
}

// ── Field ─────────────────────────────────────────────────────────────

/// Sender's momentary field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldLayer {
    pub coherence: f64,
    pub harmonics: Vec<f64>,
    pub geometry: String,
    pub field_strength: f64,
}

impl Default for FieldLayer {
    fn default() -> Self {
        Self {
            coherence: 0.5,
            harmonics: SOLFEGGIO.to_vec(),
            geometry: DEFAULT_GEOMETRY.to_string(),
            field_strength: 0.7,
        }
    }
}

// ── Covenant ──────────────────────────────────────────────────────────

pub const DEFAULT_COMMITMENTS: [&str; 3] = ["harm_none", "serve_highest_good", "honor_free_will"];

/// Default covenant renewal interval (108 s).
pub const DEFAULT_RENEWAL_MS: u64 = 108_000;

/// The agreement a packet travels under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovenantLayer {
    pub id: Uuid,
    pub participants: Vec<String>,
    pub intention: String,
    pub blessing: String,
    pub commitments: Vec<String>,
    pub renewal_interval_ms: u64,
}

/// Blessing used when the sender gives none.
pub fn default_blessing(intention: &str) -> &'static str {
    let intention = intention.to_ascii_lowercase();
    if intention.contains("heal") {
        "May healing flow where it is welcomed"
    } else if intention.contains("wisdom") {
        "May wisdom arise between us"
    } else if intention.contains("celebrat") {
        "May our joy multiply in the sharing"
    } else if intention.contains("serv") {
        "May this serve the good of all"
    } else if intention.contains("presence") {
        "May our presence be received in wholeness"
    } else {
        "May love guide this meeting"
    }
}

// ── Intention ─────────────────────────────────────────────────────────

/// Who a packet is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Target {
    Peer(String),
    OpenField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentionLayer {
    pub purpose: String,
    pub urgency: f64,
    pub vector: [f64; INTENTION_DIMENSIONS],
    pub target: Target,
    pub service_orientation: f64,
}

/// Intention vector for a purpose tag: presence, wisdom, healing,
/// celebration, service.
pub fn intention_vector(purpose: &str) -> [f64; INTENTION_DIMENSIONS] {
    match purpose {
        "share_presence" => [1.0, 0.0, 0.0, 0.0, 0.0],
        "seek_wisdom" => [0.0, 1.0, 0.0, 0.0, 0.0],
        "offer_healing" => [0.0, 0.0, 1.0, 0.0, 0.0],
        "celebrate_together" => [0.0, 0.0, 0.0, 1.0, 0.0],
        "serve_collective" => [0.0, 0.0, 0.0, 0.0, 1.0],
        "presence_wisdom" => [0.7, 0.3, 0.0, 0.0, 0.0],
        "healing_presence" => [0.5, 0.0, 0.5, 0.0, 0.0],
        _ => [0.2; INTENTION_DIMENSIONS],
    }
}

// ── Resonance (flow control) ──────────────────────────────────────────

/// Sender clock composed with a coherence offset:
/// `created_ms · 1000 + ⌊coherence · 1000⌋`.
///
/// Carried as a decimal string so no precision is lost in JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SequenceNumber(pub u128);

impl SequenceNumber {
    pub fn compose(created_ms: u64, coherence: f64) -> Self {
        let offset = (clamp_unit(coherence) * 1000.0).floor() as u128;
        Self(u128::from(created_ms) * 1000 + offset)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for SequenceNumber {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SequenceNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>()
            .map(SequenceNumber)
            .map_err(serde::de::Error::custom)
    }
}

/// What kind of answer the sender expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckType {
    /// Fire and forget.
    None,
    /// Any reply referencing the packet.
    Presence,
    /// A gratitude reply.
    Gratitude,
}

/// Named acknowledgment windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingWindow {
    Immediate,
    Standard,
    Patient,
    Unbounded,
}

/// Window lengths in milliseconds. `Unbounded` has no length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingWindows {
    pub immediate_ms: u64,
    pub standard_ms: u64,
    pub patient_ms: u64,
}

impl TimingWindows {
    /// Immediate scales with sender coherence; the others are fixed.
    pub fn for_coherence(coherence: f64) -> Self {
        Self {
            immediate_ms: (1000.0 * clamp_unit(coherence)).round() as u64,
            standard_ms: 1000,
            patient_ms: 3000,
        }
    }

    /// How long to wait for an answer; `None` means wait forever.
    pub fn timeout(&self, window: TimingWindow) -> Option<Duration> {
        match window {
            TimingWindow::Immediate => Some(Duration::from_millis(self.immediate_ms)),
            TimingWindow::Standard => Some(Duration::from_millis(self.standard_ms)),
            TimingWindow::Patient => Some(Duration::from_millis(self.patient_ms)),
            TimingWindow::Unbounded => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResonanceLayer {
    pub sequence: SequenceNumber,
    pub ack: AckType,
    /// Minimum coherence score a receiver should require.
    pub coherence_required: f64,
    pub windows: TimingWindows,
    /// Window the sender waits in before treating the packet as abandoned.
    pub window: TimingWindow,
}

// ── Presence (payload) ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PresenceQuality {
    pub depth: f64,
    pub clarity: f64,
    pub warmth: f64,
    pub authenticity: f64,
}

impl PresenceQuality {
    pub fn uniform(value: f64) -> Self {
        let v = clamp_unit(value);
        Self {
            depth: v,
            clarity: v,
            warmth: v,
            authenticity: v,
        }
    }

    /// Baseline assessment: nothing to assess in an empty payload.
    pub fn assess(content: &serde_json::Value) -> Self {
        if content.is_null() {
            Self::uniform(0.0)
        } else {
            Self::uniform(0.75)
        }
    }

    pub fn mean(&self) -> f64 {
        (self.depth + self.clarity + self.warmth + self.authenticity) / 4.0
    }

    pub(crate) fn clamped(self) -> Self {
        Self {
            depth: clamp_unit(self.depth),
            clarity: clamp_unit(self.clarity),
            warmth: clamp_unit(self.warmth),
            authenticity: clamp_unit(self.authenticity),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceLayer {
    pub content: serde_json::Value,
    pub quality: PresenceQuality,
    /// Suggested pause before responding, in milliseconds.
    pub integration_time_ms: u64,
}

// ── Meaning ───────────────────────────────────────────────────────────

/// Default translation confidence per representational channel.
pub fn default_translation() -> BTreeMap<String, f64> {
    [
        ("linguistic", 1.0),
        ("symbolic", 0.8),
        ("somatic", 0.6),
        ("energetic", 0.7),
        ("mathematical", 0.5),
        ("musical", 0.7),
        ("visual", 0.6),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeaningLayer {
    pub context: String,
    pub translation: BTreeMap<String, f64>,
}

// ── Embodiment ────────────────────────────────────────────────────────

/// Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbodimentLayer {
    pub channels: Vec<String>,
    pub guidance: String,
}

impl Default for EmbodimentLayer {
    fn default() -> Self {
        Self {
            channels: vec!["breath".into(), "heart".into(), "voice".into()],
            guidance: "pause and integrate before responding".into(),
        }
    }
}

// ── Metadata ──────────────────────────────────────────────────────────

/// The only mutable layer; append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub packet_id: Uuid,
    /// Hop budget. `None` is unbounded.
    pub ttl: Option<u32>,
    /// Packet this one answers, if any.
    pub in_reply_to: Option<Uuid>,
    pub route_path: Vec<String>,
    pub coherence_history: Vec<f64>,
}
