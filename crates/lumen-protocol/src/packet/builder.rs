use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::entropy::EntropySource;
use crate::types::{clamp_unit, now_ms, DEFAULT_GEOMETRY, SOLFEGGIO};

use super::{
    default_blessing, default_translation, intention_vector, AckType, CovenantLayer,
    CreationContext, EmbodimentLayer, FieldLayer, IntentionLayer, Kairos, MeaningLayer, Metadata,
    OriginLayer, Packet, PresenceLayer, PresenceQuality, ResonanceLayer, SequenceNumber, Target,
    TimingWindow, TimingWindows, DEFAULT_COMMITMENTS, DEFAULT_RENEWAL_MS, DEFAULT_TTL,
};

/// Builder for outbound packets.
///
/// Everything but the purpose has a default. Identity (origin signature,
/// packet id, covenant id) is drawn from an [`EntropySource`] at
/// [`build`](Self::build) time, so a builder can be cloned and built
/// repeatedly into distinct packets.
#[derive(Debug, Clone)]
pub struct PacketBuilder {
    purpose: String,
    creator: String,
    content: serde_json::Value,
    coherence: f64,
    field_strength: f64,
    harmonics: Vec<f64>,
    geometry: String,
    participants: Vec<String>,
    covenant_intention: Option<String>,
    blessing: Option<String>,
    commitments: Vec<String>,
    renewal_interval_ms: u64,
    urgency: f64,
    target: Target,
    service_orientation: f64,
    ack: AckType,
    coherence_required: f64,
    window: TimingWindow,
    quality: Option<PresenceQuality>,
    integration_time_ms: u64,
    context: Option<String>,
    translation: BTreeMap<String, f64>,
    embodiment: EmbodimentLayer,
    ttl: Option<u32>,
    in_reply_to: Option<Uuid>,
}

impl PacketBuilder {
    pub fn new(purpose: impl Into<String>) -> Self {
        Self {
            purpose: purpose.into(),
            creator: String::new(),
            content: serde_json::Value::Null,
            coherence: 0.5,
            field_strength: 0.7,
            harmonics: SOLFEGGIO.to_vec(),
            geometry: DEFAULT_GEOMETRY.to_string(),
            participants: Vec::new(),
            covenant_intention: None,
            blessing: None,
            commitments: DEFAULT_COMMITMENTS.iter().map(|c| c.to_string()).collect(),
            renewal_interval_ms: DEFAULT_RENEWAL_MS,
            urgency: 0.5,
            target: Target::OpenField,
            service_orientation: 0.8,
            ack: AckType::None,
            coherence_required: 0.3,
            window: TimingWindow::Standard,
            quality: None,
            integration_time_ms: 3000,
            context: None,
            translation: default_translation(),
            embodiment: EmbodimentLayer::default(),
            ttl: Some(DEFAULT_TTL),
            in_reply_to: None,
        }
    }

    pub fn purpose(&self) -> &str {
        &self.purpose
    }

    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    pub fn content(mut self, content: serde_json::Value) -> Self {
        self.content = content;
        self
    }

    pub fn coherence(mut self, coherence: f64) -> Self {
        self.coherence = coherence;
        self
    }

    pub fn field_strength(mut self, strength: f64) -> Self {
        self.field_strength = strength;
        self
    }

    pub fn harmonics(mut self, harmonics: Vec<f64>) -> Self {
        self.harmonics = harmonics;
        self
    }

    pub fn geometry(mut self, geometry: impl Into<String>) -> Self {
        self.geometry = geometry.into();
        self
    }

    pub fn participants(mut self, participants: Vec<String>) -> Self {
        self.participants = participants;
        self
    }

    /// Covenant intention; defaults to the purpose.
    pub fn covenant_intention(mut self, intention: impl Into<String>) -> Self {
        self.covenant_intention = Some(intention.into());
        self
    }

    /// Blessing; defaults to one chosen from the covenant intention.
    pub fn blessing(mut self, blessing: impl Into<String>) -> Self {
        self.blessing = Some(blessing.into());
        self
    }

    pub fn commitments(mut self, commitments: Vec<String>) -> Self {
        self.commitments = commitments;
        self
    }

    pub fn renewal_interval_ms(mut self, ms: u64) -> Self {
        self.renewal_interval_ms = ms;
        self
    }

    pub fn urgency(mut self, urgency: f64) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn to_peer(self, peer: impl Into<String>) -> Self {
        self.target(Target::Peer(peer.into()))
    }

    pub fn service_orientation(mut self, value: f64) -> Self {
        self.service_orientation = value;
        self
    }

    pub fn ack(mut self, ack: AckType) -> Self {
        self.ack = ack;
        self
    }

    pub fn coherence_required(mut self, required: f64) -> Self {
        self.coherence_required = required;
        self
    }

    pub fn window(mut self, window: TimingWindow) -> Self {
        self.window = window;
        self
    }

    /// Explicit presence quality; otherwise assessed from the content.
    pub fn quality(mut self, quality: PresenceQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn integration_time_ms(mut self, ms: u64) -> Self {
        self.integration_time_ms = ms;
        self
    }

    /// Semantic context; defaults to the purpose.
    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn translation(mut self, translation: BTreeMap<String, f64>) -> Self {
        self.translation = translation;
        self
    }

    pub fn embodiment(mut self, channels: Vec<String>, guidance: impl Into<String>) -> Self {
        self.embodiment = EmbodimentLayer {
            channels,
            guidance: guidance.into(),
        };
        self
    }

    pub fn ttl(mut self, ttl: Option<u32>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn in_reply_to(mut self, packet_id: Uuid) -> Self {
        self.in_reply_to = Some(packet_id);
        self
    }

    /// Build at the current wall-clock time.
    pub fn build(self, entropy: &mut dyn EntropySource) -> Packet {
        self.build_at(entropy, now_ms())
    }

    /// Build with an explicit creation time.
    pub fn build_at(self, entropy: &mut dyn EntropySource, created_at: u64) -> Packet {
        let coherence = clamp_unit(self.coherence);

        let mut hasher = Sha256::new();
        hasher.update(entropy.next());
        hasher.update(created_at.to_be_bytes());
        let signature = hex::encode(hasher.finalize());

        let packet_id = uuid_from(entropy.next());
        let covenant_id = uuid_from(entropy.next());

        let covenant_intention = self
            .covenant_intention
            .unwrap_or_else(|| self.purpose.clone());
        let blessing = self
            .blessing
            .unwrap_or_else(|| default_blessing(&covenant_intention).to_string());
        let quality = self
            .quality
            .unwrap_or_else(|| PresenceQuality::assess(&self.content));
        let context = self.context.unwrap_or_else(|| self.purpose.clone());

        let mut packet = Packet {
            origin: OriginLayer {
                signature,
                created_at,
                context: CreationContext {
                    creator: self.creator,
                    field_coherence: coherence,
                    kairos: Kairos::from_coherence(coherence),
                },
            },
            field: FieldLayer {
                coherence,
                harmonics: self.harmonics,
                geometry: self.geometry,
                field_strength: self.field_strength,
            },
            covenant: CovenantLayer {
                id: covenant_id,
                participants: self.participants,
                intention: covenant_intention,
                blessing,
                commitments: self.commitments,
                renewal_interval_ms: self.renewal_interval_ms,
            },
            intention: IntentionLayer {
                vector: intention_vector(&self.purpose),
                purpose: self.purpose,
                urgency: self.urgency,
                target: self.target,
                service_orientation: self.service_orientation,
            },
            resonance: ResonanceLayer {
                sequence: SequenceNumber::compose(created_at, coherence),
                ack: self.ack,
                coherence_required: self.coherence_required,
                windows: TimingWindows::for_coherence(coherence),
                window: self.window,
            },
            presence: PresenceLayer {
                content: self.content,
                quality,
                integration_time_ms: self.integration_time_ms,
            },
            meaning: MeaningLayer {
                context,
                translation: self.translation,
            },
            embodiment: self.embodiment,
            metadata: Metadata {
                packet_id,
                ttl: self.ttl,
                in_reply_to: self.in_reply_to,
                route_path: Vec::new(),
                coherence_history: Vec::new(),
            },
        };
        packet.normalize();
        packet
    }
}

fn uuid_from(bytes: [u8; 32]) -> Uuid {
    let mut random = [0u8; 16];
    random.copy_from_slice(&bytes[..16]);
    uuid::Builder::from_random_bytes(random).into_uuid()
}
