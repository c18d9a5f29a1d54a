use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use lumen_transport::ConnectionId;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::signature::IdentitySignature;

/// Configuration for connection presence.
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Score a packet needs to count as passing (default 0.3).
    pub min_coherence: f64,
    /// Resonance needed to leave negotiation (default 30).
    pub resonance_floor: f64,
    /// Consecutive failing packets before Established degrades (default 3).
    pub degrade_after: u32,
    /// Silence after which presence starts to decay (default 30 s).
    /// Twice this closes the connection. Zero disables decay.
    pub decay_window: Duration,
    /// Presence multiplier per pulse while silent (default 0.95).
    pub fade_factor: f64,
    /// Presence under which a silent connection closes (default 0.1).
    pub removal_threshold: f64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            min_coherence: 0.3,
            resonance_floor: 30.0,
            degrade_after: 3,
            decay_window: Duration::from_secs(30),
            fade_factor: 0.95,
            removal_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Negotiating,
    Established,
    Degraded,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Negotiating => "negotiating",
            ConnectionState::Established => "established",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        }
    }

    /// Established or Degraded: counted as a field member.
    pub fn is_member(&self) -> bool {
        matches!(self, ConnectionState::Established | ConnectionState::Degraded)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable outcome of a state-machine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    Negotiating,
    Established,
    Degraded,
    /// Degraded back to Established.
    Recovered,
    /// Presence decayed below the admission threshold.
    Fading,
    Closed,
}

/// Per-peer session record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub remote: SocketAddr,
    pub state: ConnectionState,
    /// The peer's current signature, replaced wholesale on update.
    pub signature: Option<IdentitySignature>,
    /// Score of the most recent packet.
    pub last_coherence: f64,
    /// Presence strength in `[0, 1]`; decays while the peer is silent.
    pub presence: f64,
    pub last_seen_ms: u64,
    pub opened_at_ms: u64,
    /// Consecutive packets below threshold.
    pub low_streak: u32,
    /// Packets blocked by the security gate.
    pub blocks: u32,
    #[serde(skip)]
    fading: bool,
}

impl Connection {
    pub fn new(id: ConnectionId, remote: SocketAddr, now_ms: u64) -> Self {
        Self {
            id,
            remote,
            state: ConnectionState::Connecting,
            signature: None,
            last_coherence: 0.0,
            presence: 1.0,
            last_seen_ms: now_ms,
            opened_at_ms: now_ms,
            low_streak: 0,
            blocks: 0,
            fading: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    fn invalid(&self, event: &'static str) -> ProtocolError {
        ProtocolError::InvalidTransition {
            from: self.state,
            event,
        }
    }

    /// Transport handshake done: Connecting → Negotiating.
    pub fn handshake_complete(&mut self) -> Result<Option<PresenceTransition>, ProtocolError> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Negotiating;
                Ok(Some(PresenceTransition::Negotiating))
            }
            _ => Err(self.invalid("handshake_complete")),
        }
    }

    /// Account one scored packet.
    pub fn observe(
        &mut self,
        score: f64,
        resonance_ok: bool,
        now_ms: u64,
        config: &PresenceConfig,
    ) -> Result<Option<PresenceTransition>, ProtocolError> {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Closed
        ) {
            return Err(self.invalid("observe"));
        }

        self.last_coherence = score;
        self.last_seen_ms = now_ms;
        let passing = score >= config.min_coherence;
        if passing {
            self.low_streak = 0;
            self.presence = 1.0;
            self.fading = false;
        } else {
            self.low_streak = self.low_streak.saturating_add(1);
        }

        let transition = match self.state {
            ConnectionState::Negotiating if passing && resonance_ok => {
                self.state = ConnectionState::Established;
                Some(PresenceTransition::Established)
            }
            ConnectionState::Established if self.low_streak >= config.degrade_after => {
                self.state = ConnectionState::Degraded;
                Some(PresenceTransition::Degraded)
            }
            ConnectionState::Degraded if passing => {
                self.state = ConnectionState::Established;
                Some(PresenceTransition::Recovered)
            }
            _ => None,
        };
        Ok(transition)
    }

    /// Liveness without a score, e.g. a control frame.
    pub fn touch(&mut self, now_ms: u64) {
        if self.is_open() {
            self.last_seen_ms = now_ms;
        }
    }

    /// Partial transport failure: Established → Degraded.
    pub fn transport_fault(&mut self) -> Result<Option<PresenceTransition>, ProtocolError> {
        match self.state {
            ConnectionState::Closed => Err(self.invalid("transport_fault")),
            ConnectionState::Established => {
                self.state = ConnectionState::Degraded;
                Ok(Some(PresenceTransition::Degraded))
            }
            _ => Ok(None),
        }
    }

    pub fn set_signature(
        &mut self,
        signature: IdentitySignature,
    ) -> Result<Option<PresenceTransition>, ProtocolError> {
        if !self.is_open() {
            return Err(self.invalid("set_signature"));
        }
        self.signature = Some(signature);
        Ok(None)
    }

    /// Count one blocked packet; returns the new total.
    pub fn record_block(&mut self) -> u32 {
        self.blocks = self.blocks.saturating_add(1);
        self.blocks
    }

    pub fn close(&mut self) -> Result<Option<PresenceTransition>, ProtocolError> {
        if !self.is_open() {
            return Err(self.invalid("close"));
        }
        self.state = ConnectionState::Closed;
        Ok(Some(PresenceTransition::Closed))
    }

    /// One tick of the presence-decay timer.
    pub fn pulse(
        &mut self,
        now_ms: u64,
        config: &PresenceConfig,
    ) -> Result<Option<PresenceTransition>, ProtocolError> {
        if !self.is_open() {
            return Err(self.invalid("pulse"));
        }

        let window = config.decay_window.as_millis() as u64;
        if window == 0 {
            return Ok(None);
        }
        let silent = now_ms.saturating_sub(self.last_seen_ms);
        if silent >= window.saturating_mul(2) {
            return self.close();
        }
        if silent <= window || !self.state.is_member() {
            return Ok(None);
        }

        self.presence *= config.fade_factor;
        if self.presence < config.removal_threshold {
            return self.close();
        }
        if !self.fading && self.presence < config.min_coherence {
            self.fading = true;
            if self.state == ConnectionState::Established {
                self.state = ConnectionState::Degraded;
            }
            return Ok(Some(PresenceTransition::Fading));
        }
        Ok(None)
    }
}
