use std::num::NonZeroUsize;

use bytes::Bytes;
use lru::LruCache;
use lumen_transport::{ConnectionId, TransportEvent};
use uuid::Uuid;

use crate::coherence::CoherenceEngine;
use crate::control::{ControlFrame, DeclineReason};
use crate::entropy::{EntropySource, OsEntropy};
use crate::error::ProtocolError;
use crate::events::{LifecycleEvent, Rejection};
use crate::field::{FieldAggregator, FieldState};
use crate::packet::{decode, encode, AckType, Decoded, Packet, PacketBuilder, Target};
use crate::presence::{Connection, ConnectionRegistry, PresenceTransition};
use crate::resonance::resonance;
use crate::router::{broadcast_targets, Dispatch, DispatchContext, IntentionRouter};
use crate::security::{SecurityContext, SecurityGate, SecurityVerdict, Transmutation, TransmutationAction};
use crate::signature::IdentitySignature;
use crate::tracker::AckTracker;

use super::effect::RuntimeEffect;
use super::{RuntimeConfig, RuntimeStats};

/// A packet accepted for sending.
#[derive(Debug)]
pub struct Outbound {
    pub packet_id: Uuid,
    pub targets: Vec<ConnectionId>,
    pub effects: Vec<RuntimeEffect>,
}

/// Complete protocol state. Pure logic: no async, no network.
///
/// Every `handle_*` / `tick_*` method returns the effects to carry out.
/// Time is passed in, so tests drive it explicitly.
pub struct RuntimeState {
    pub(crate) config: RuntimeConfig,

    pub(crate) registry: ConnectionRegistry,
    pub(crate) coherence: CoherenceEngine,
    pub(crate) security: SecurityGate,
    pub(crate) field: FieldAggregator,
    pub(crate) router: IntentionRouter,
    pub(crate) tracker: AckTracker,
    pub(crate) stats: RuntimeStats,

    /// Packet ids already handled (inbound, sent, or relayed).
    seen: LruCache<Uuid, ()>,
    entropy: Box<dyn EntropySource>,
}

impl RuntimeState {
    pub fn new(config: RuntimeConfig) -> Self {
        let seen = LruCache::new(NonZeroUsize::new(config.seen_cache).unwrap_or(NonZeroUsize::MIN));
        let field = FieldAggregator::new(config.field.clone());
        let stats = RuntimeStats::default();
        stats.field_coherence.set(field.coherence());
        Self {
            registry: ConnectionRegistry::new(),
            coherence: CoherenceEngine::new(config.coherence.clone()),
            security: SecurityGate::new(config.security.clone()),
            field,
            router: IntentionRouter::with_defaults(),
            tracker: AckTracker::new(),
            stats,
            seen,
            entropy: Box::new(OsEntropy),
            config,
        }
    }

    pub fn with_router(mut self, router: IntentionRouter) -> Self {
        self.router = router;
        self
    }

    /// Replace the entropy used for outbound packet identity.
    pub fn with_entropy(mut self, entropy: impl EntropySource + 'static) -> Self {
        self.entropy = Box::new(entropy);
        self
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Every known connection, in id order.
    pub fn connections(&self) -> Vec<Connection> {
        let mut all: Vec<_> = self.registry.iter().cloned().collect();
        all.sort_by_key(|c| c.id);
        all
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<&Connection> {
        self.registry.get(id)
    }

    pub fn field_snapshot(&self) -> FieldState {
        self.field.snapshot()
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }

    pub fn local_signature(&self) -> &IdentitySignature {
        &self.config.signature
    }

    // ── Transport events ─────────────────────────────────────────────────

    pub fn handle_transport(&mut self, event: TransportEvent, now_ms: u64) -> Vec<RuntimeEffect> {
        match event {
            TransportEvent::Opened { id, remote } => {
                tracing::debug!(connection = %id, %remote, "connection opened");
                if let Some(previous) = self.registry.insert(Connection::new(id, remote, now_ms)) {
                    tracing::warn!(connection = %id, state = %previous.state, "replaced existing connection");
                }
                Vec::new()
            }
            TransportEvent::HandshakeComplete { id } => self.handle_handshake(id),
            TransportEvent::Frame { id, data } => self.handle_frame(id, &data, now_ms),
            TransportEvent::Fault { id, reason } => {
                tracing::warn!(connection = %id, "transport fault: {reason}");
                if let Some(conn) = self.registry.get_mut(&id) {
                    match conn.transport_fault() {
                        Ok(Some(_)) => tracing::info!(connection = %id, "presence degraded by transport fault"),
                        Ok(None) => {}
                        Err(e) => tracing::debug!(connection = %id, "fault ignored: {e}"),
                    }
                }
                Vec::new()
            }
            TransportEvent::Closed { id, reason } => {
                // Connections closed locally were already retired.
                let closed = self
                    .registry
                    .get_mut(&id)
                    .is_some_and(|c| c.close().is_ok());
                if closed {
                    self.retire(id, &reason)
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn handle_handshake(&mut self, id: ConnectionId) -> Vec<RuntimeEffect> {
        let Some(conn) = self.registry.get_mut(&id) else {
            tracing::debug!(connection = %id, "handshake for unknown connection");
            return Vec::new();
        };
        if let Err(e) = conn.handshake_complete() {
            tracing::warn!(connection = %id, "handshake: {e}");
            return Vec::new();
        }

        let mut effects = Vec::new();
        match ControlFrame::signature(&self.config.signature) {
            Ok(frame) => self.send_control(id, &frame, &mut effects),
            Err(e) => tracing::error!("cannot encode local signature: {e}"),
        }
        effects
    }

    fn handle_frame(&mut self, id: ConnectionId, data: &[u8], now_ms: u64) -> Vec<RuntimeEffect> {
        if !self.registry.is_open(&id) {
            tracing::debug!(connection = %id, "frame for unknown or closed connection dropped");
            return Vec::new();
        }
        self.stats.frames_received.inc();

        let mut effects = Vec::new();
        match decode(data) {
            Ok(Decoded::Packet(packet)) => self.handle_packet(id, *packet, now_ms, &mut effects),
            Ok(Decoded::NotAPacket(Some(value))) => {
                self.handle_control(id, value, now_ms, &mut effects)
            }
            Ok(Decoded::NotAPacket(None)) => {
                self.stats.decode_failures.inc();
                let message = "frame is not JSON".to_string();
                self.decline(id, DeclineReason::Unrecognized, &message, &mut effects);
                effects.push(self.reject(id, None, Rejection::Decode { message }));
            }
            Err(e) => {
                self.stats.decode_failures.inc();
                tracing::debug!(connection = %id, "undecodable packet: {e}");
                let message = e.to_string();
                self.decline(id, DeclineReason::Decode, &message, &mut effects);
                effects.push(self.reject(id, None, Rejection::Decode { message }));
            }
        }
        effects
    }

    // ── Control frames ───────────────────────────────────────────────────

    fn handle_control(
        &mut self,
        id: ConnectionId,
        value: serde_json::Value,
        now_ms: u64,
        effects: &mut Vec<RuntimeEffect>,
    ) {
        match ControlFrame::from_value(value) {
            Some(ControlFrame::Signature(raw)) => match IdentitySignature::from_value(&raw) {
                Ok(signature) => {
                    let mode = signature.mode;
                    if let Some(conn) = self.registry.get_mut(&id) {
                        conn.touch(now_ms);
                        if let Err(e) = conn.set_signature(signature) {
                            tracing::debug!(connection = %id, "signature ignored: {e}");
                            return;
                        }
                    }
                    tracing::debug!(connection = %id, %mode, "peer signature received");
                    let before = self.field.snapshot();
                    self.field.set_mode(&id, Some(mode));
                    self.publish_field_if_changed(before, effects);
                }
                Err(ProtocolError::Validation { fields }) => {
                    tracing::debug!(connection = %id, ?fields, "invalid peer signature");
                    let message = format!("invalid signature: {}", fields.join(", "));
                    self.decline(id, DeclineReason::Validation, &message, effects);
                    effects.push(self.reject(id, None, Rejection::Validation { fields }));
                }
                Err(e) => {
                    let message = e.to_string();
                    self.decline(id, DeclineReason::Validation, &message, effects);
                    effects.push(self.reject(id, None, Rejection::Decode { message }));
                }
            },
            Some(response) if response.is_response() => {
                if let Some(conn) = self.registry.get_mut(&id) {
                    conn.touch(now_ms);
                }
                effects.push(RuntimeEffect::Emit(LifecycleEvent::PeerResponse {
                    connection: id,
                    response,
                }));
            }
            _ => {
                self.stats.decode_failures.inc();
                let message = "unrecognized frame".to_string();
                self.decline(id, DeclineReason::Unrecognized, &message, effects);
                effects.push(self.reject(id, None, Rejection::Decode { message }));
            }
        }
    }

    // ── Packets ──────────────────────────────────────────────────────────

    /// Dedup, score, gate, admit, dispatch.
    fn handle_packet(
        &mut self,
        id: ConnectionId,
        mut packet: Packet,
        now_ms: u64,
        effects: &mut Vec<RuntimeEffect>,
    ) {
        let packet_id = packet.id();
        if self.seen.put(packet_id, ()).is_some() {
            tracing::debug!(connection = %id, %packet_id, "duplicate packet dropped");
            return;
        }

        let (peer_signature, prior_blocks) = match self.registry.get(&id) {
            Some(conn) => (conn.signature.clone(), conn.blocks),
            None => (None, 0),
        };
        let report = self.coherence.score(
            &packet,
            peer_signature
                .as_ref()
                .map(|peer| (&self.config.signature, peer)),
        );

        let ctx = SecurityContext {
            local_coherence: self.field.coherence() / 100.0,
            local_strength: self.config.local_field_strength,
            peer_resonance: peer_signature
                .as_ref()
                .map(|peer| resonance(&self.config.signature, peer)),
            prior_blocks,
        };
        let verdict = self.security.check(&packet, &ctx);
        if !verdict.allowed {
            self.block(id, packet_id, verdict, now_ms, effects);
            return;
        }
        for advice in &verdict.recommendations {
            tracing::debug!(connection = %id, %packet_id, "security: {advice}");
        }

        let resonance_ok = self.resonance_ok(peer_signature.as_ref());
        if !report.admitted {
            tracing::debug!(connection = %id, %packet_id, score = report.score, "packet below threshold");
            let mut recommendations = report.recommendations;
            if let Some(advice) = peer_signature
                .as_ref()
                .and_then(|peer| self.field.suggest_adjustment(peer).advice())
            {
                recommendations.push(advice);
            }
            self.send_control(
                id,
                &ControlFrame::Admission {
                    score: report.score,
                    recommendations: recommendations.clone(),
                },
                effects,
            );
            effects.push(self.reject(
                id,
                Some(packet_id),
                Rejection::Admission {
                    score: report.score,
                    recommendations,
                },
            ));
            self.observe(id, report.score, resonance_ok, now_ms, effects);
            return;
        }

        self.stats.packets_admitted.inc();
        packet.record_hop(self.config.local_id.clone(), report.score);
        self.observe(id, report.score, resonance_ok, now_ms, effects);

        let before = self.field.snapshot();
        self.field.admit(&id, packet.field.coherence);
        self.publish_field_if_changed(before, effects);

        if let Some(original) = packet.metadata.in_reply_to {
            if self.tracker.acknowledge(&original) {
                tracing::debug!(connection = %id, packet_id = %original, "packet acknowledged");
            }
        }

        let dispatch = {
            let field = self.field.snapshot();
            let ctx = DispatchContext {
                from: id,
                local_id: &self.config.local_id,
                local_signature: &self.config.signature,
                peer: peer_signature.as_ref(),
                field: &field,
            };
            self.router.dispatch(&packet, &ctx)
        };
        let relay = if dispatch.broadcast && !packet.ttl_exhausted() {
            match encode(&packet) {
                Ok(bytes) => Some(Bytes::from(bytes)),
                Err(e) => {
                    tracing::warn!(%packet_id, "cannot re-encode packet for relay: {e}");
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(
            connection = %id,
            %packet_id,
            purpose = packet.purpose(),
            score = report.score,
            "packet admitted"
        );
        effects.push(RuntimeEffect::Emit(LifecycleEvent::PacketAdmitted {
            connection: id,
            score: report.score,
            packet: Box::new(packet),
        }));

        self.carry_out(id, dispatch, relay, now_ms, effects);
    }

    /// Apply a handler's decision for a packet admitted from `from`.
    fn carry_out(
        &mut self,
        from: ConnectionId,
        dispatch: Dispatch,
        relay: Option<Bytes>,
        now_ms: u64,
        effects: &mut Vec<RuntimeEffect>,
    ) {
        if let Some(builder) = dispatch.reply {
            let reply = builder.build_at(self.entropy.as_mut(), now_ms);
            self.seen.put(reply.id(), ());
            match encode(&reply) {
                Ok(bytes) => {
                    self.stats.packets_sent.inc();
                    effects.push(RuntimeEffect::Send {
                        to: from,
                        bytes: Bytes::from(bytes),
                    });
                }
                Err(e) => tracing::warn!(connection = %from, "cannot encode reply: {e}"),
            }
        }

        if let Some(bytes) = relay {
            let targets = broadcast_targets(&self.registry, Some(from));
            if !targets.is_empty() {
                self.stats.broadcasts.inc();
                self.stats.packets_sent.inc_by(targets.len() as u64);
            }
            for to in targets {
                effects.push(RuntimeEffect::Send {
                    to,
                    bytes: bytes.clone(),
                });
            }
        }

        if let Some(delta) = dispatch.field_boost {
            let before = self.field.snapshot();
            self.field.nudge(delta);
            self.publish_field_if_changed(before, effects);
        }
    }

    fn block(
        &mut self,
        id: ConnectionId,
        packet_id: Uuid,
        verdict: SecurityVerdict,
        now_ms: u64,
        effects: &mut Vec<RuntimeEffect>,
    ) {
        self.stats.security_blocks.inc();
        let transmutation = verdict
            .transmutation
            .unwrap_or_else(|| Transmutation::new(TransmutationAction::Redirect, "packet held"));
        let blocks = match self.registry.get_mut(&id) {
            Some(conn) => {
                conn.touch(now_ms);
                conn.record_block()
            }
            None => 0,
        };
        tracing::warn!(
            connection = %id,
            %packet_id,
            action = %transmutation.action,
            blocks,
            "packet blocked"
        );

        self.send_control(id, &ControlFrame::Transmutation(transmutation.clone()), effects);
        effects.push(self.reject(
            id,
            Some(packet_id),
            Rejection::Security {
                action: transmutation.action,
                message: transmutation.message,
            },
        ));

        if blocks > self.config.max_blocks {
            effects.extend(self.close_connection(id, "too many blocked packets"));
        }
    }

    /// Whether the sender resonates with this node or the field.
    ///
    /// A known signature must clear the floor against the local signature
    /// or any member's. An unknown one is vouched for by the field alone.
    fn resonance_ok(&self, peer: Option<&IdentitySignature>) -> bool {
        let floor = self.config.presence.resonance_floor;
        match peer {
            Some(peer) => {
                resonance(&self.config.signature, peer) > floor
                    || self
                        .registry
                        .iter()
                        .filter(|c| c.state.is_member())
                        .filter_map(|c| c.signature.as_ref())
                        .any(|member| resonance(member, peer) > floor)
            }
            None => self.field.coherence() > floor,
        }
    }

    fn observe(
        &mut self,
        id: ConnectionId,
        score: f64,
        resonance_ok: bool,
        now_ms: u64,
        effects: &mut Vec<RuntimeEffect>,
    ) {
        let Some(conn) = self.registry.get_mut(&id) else {
            return;
        };
        match conn.observe(score, resonance_ok, now_ms, &self.config.presence) {
            Ok(Some(PresenceTransition::Established)) => {
                let mode = conn.signature.as_ref().map(|s| s.mode);
                let connection = conn.clone();
                tracing::info!(connection = %id, remote = %connection.remote, "presence established");

                let before = self.field.snapshot();
                self.field.join(id, mode);
                self.publish_field_if_changed(before, effects);
                effects.push(RuntimeEffect::Emit(LifecycleEvent::ConnectionEstablished {
                    connection,
                }));
            }
            Ok(Some(PresenceTransition::Degraded)) => {
                tracing::info!(connection = %id, low_streak = conn.low_streak, "presence degraded");
            }
            Ok(Some(PresenceTransition::Recovered)) => {
                tracing::info!(connection = %id, "presence recovered");
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(connection = %id, "observe: {e}"),
        }
    }

    // ── Outbound ─────────────────────────────────────────────────────────

    /// Build and queue a packet for one open connection.
    ///
    /// Packets asking for an acknowledgment are tracked until answered
    /// or their timing window runs out.
    pub fn send_packet(
        &mut self,
        to: ConnectionId,
        builder: PacketBuilder,
        now_ms: u64,
    ) -> Result<Outbound, ProtocolError> {
        if !self.registry.is_open(&to) {
            return Err(ProtocolError::UnknownConnection(to));
        }
        let packet = builder
            .creator(self.config.local_id.clone())
            .build_at(self.entropy.as_mut(), now_ms);
        let bytes = Bytes::from(encode(&packet)?);
        let packet_id = packet.id();
        self.seen.put(packet_id, ());

        if packet.resonance.ack != AckType::None {
            let timeout = packet.resonance.windows.timeout(packet.resonance.window);
            if !self.tracker.track(packet_id, to, timeout, now_ms) {
                tracing::warn!(%packet_id, "ack tracker full, packet not tracked");
            }
        }

        self.stats.packets_sent.inc();
        tracing::debug!(connection = %to, %packet_id, purpose = packet.purpose(), "packet queued");
        Ok(Outbound {
            packet_id,
            targets: vec![to],
            effects: vec![RuntimeEffect::Send { to, bytes }],
        })
    }

    /// Build an open-field packet and queue it for every established
    /// connection. Zero targets is not an error.
    pub fn broadcast_packet(
        &mut self,
        builder: PacketBuilder,
        now_ms: u64,
    ) -> Result<Outbound, ProtocolError> {
        let packet = builder
            .creator(self.config.local_id.clone())
            .target(Target::OpenField)
            .build_at(self.entropy.as_mut(), now_ms);
        let bytes = Bytes::from(encode(&packet)?);
        let packet_id = packet.id();
        self.seen.put(packet_id, ());

        let targets = broadcast_targets(&self.registry, None);
        self.stats.broadcasts.inc();
        self.stats.packets_sent.inc_by(targets.len() as u64);
        tracing::debug!(%packet_id, targets = targets.len(), "packet broadcast");

        let effects = targets
            .iter()
            .map(|&to| RuntimeEffect::Send {
                to,
                bytes: bytes.clone(),
            })
            .collect();
        Ok(Outbound {
            packet_id,
            targets,
            effects,
        })
    }

    // ── Closing ──────────────────────────────────────────────────────────

    /// Close a connection from this side.
    pub fn close_connection(&mut self, id: ConnectionId, reason: &str) -> Vec<RuntimeEffect> {
        let closed = self
            .registry
            .get_mut(&id)
            .is_some_and(|c| c.close().is_ok());
        if !closed {
            return Vec::new();
        }
        let mut effects = self.retire(id, reason);
        effects.push(RuntimeEffect::Close(id));
        effects
    }

    /// Close every open connection.
    pub fn shutdown(&mut self) -> Vec<RuntimeEffect> {
        let open: Vec<_> = self
            .registry
            .iter()
            .filter(|c| c.is_open())
            .map(|c| c.id)
            .collect();
        open.into_iter()
            .flat_map(|id| self.close_connection(id, "runtime shutdown"))
            .collect()
    }

    /// Bookkeeping for a connection that just reached Closed.
    fn retire(&mut self, id: ConnectionId, reason: &str) -> Vec<RuntimeEffect> {
        let mut effects = Vec::new();

        let before = self.field.snapshot();
        if self.field.leave(&id) {
            self.publish_field_if_changed(before, &mut effects);
        }
        for packet_id in self.tracker.forget_connection(id) {
            effects.push(RuntimeEffect::Emit(LifecycleEvent::PacketAbandoned {
                connection: id,
                packet_id,
            }));
        }
        if let Some(conn) = self.registry.get(&id) {
            tracing::info!(connection = %id, remote = %conn.remote, "connection closed: {reason}");
            effects.push(RuntimeEffect::Emit(LifecycleEvent::ConnectionClosed {
                connection: conn.clone(),
                reason: reason.to_string(),
            }));
        }
        effects
    }

    // ── Tick: pulse ──────────────────────────────────────────────────────

    /// Presence decay, field relaxation, ack timeouts, registry cleanup.
    pub fn tick_pulse(&mut self, now_ms: u64) -> Vec<RuntimeEffect> {
        let mut effects = Vec::new();

        let mut fading = Vec::new();
        let mut expired = Vec::new();
        for conn in self.registry.iter_mut().filter(|c| c.is_open()) {
            match conn.pulse(now_ms, &self.config.presence) {
                Ok(Some(PresenceTransition::Fading)) => fading.push(conn.clone()),
                Ok(Some(PresenceTransition::Closed)) => expired.push(conn.id),
                Ok(_) => {}
                Err(e) => tracing::debug!(connection = %conn.id, "pulse: {e}"),
            }
        }
        for connection in fading {
            tracing::info!(connection = %connection.id, presence = connection.presence, "presence fading");
            effects.push(RuntimeEffect::Emit(LifecycleEvent::PresenceFading { connection }));
        }
        for id in expired {
            effects.extend(self.retire(id, "presence faded"));
            effects.push(RuntimeEffect::Close(id));
        }

        let before = self.field.snapshot();
        if self.field.pulse() {
            self.publish_field_if_changed(before, &mut effects);
        }

        for (packet_id, connection) in self.tracker.sweep(now_ms) {
            tracing::debug!(connection = %connection, %packet_id, "no answer inside timing window");
            effects.push(RuntimeEffect::Emit(LifecycleEvent::PacketAbandoned {
                connection,
                packet_id,
            }));
        }

        let removed = self.registry.sweep_closed();
        if !removed.is_empty() {
            tracing::trace!(count = removed.len(), "closed connections swept");
        }
        effects
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn publish_field_if_changed(&self, before: FieldState, effects: &mut Vec<RuntimeEffect>) {
        let after = self.field.snapshot();
        if after != before {
            self.stats.field_coherence.set(after.coherence);
            effects.push(RuntimeEffect::Emit(LifecycleEvent::FieldStateChanged {
                field: after.clone(),
            }));
            effects.push(RuntimeEffect::PublishField(after));
        }
    }

    fn send_control(&self, to: ConnectionId, frame: &ControlFrame, effects: &mut Vec<RuntimeEffect>) {
        match frame.encode() {
            Ok(bytes) => effects.push(RuntimeEffect::Send {
                to,
                bytes: Bytes::from(bytes),
            }),
            Err(e) => tracing::error!(connection = %to, "cannot encode control frame: {e}"),
        }
    }

    fn decline(
        &self,
        to: ConnectionId,
        reason: DeclineReason,
        message: &str,
        effects: &mut Vec<RuntimeEffect>,
    ) {
        self.send_control(to, &ControlFrame::decline(reason, message), effects);
    }

    fn reject(&self, connection: ConnectionId, packet_id: Option<Uuid>, rejection: Rejection) -> RuntimeEffect {
        self.stats.packets_rejected.inc();
        RuntimeEffect::Emit(LifecycleEvent::PacketRejected {
            connection,
            packet_id,
            rejection,
        })
    }
}
