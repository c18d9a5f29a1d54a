//! Protocol runtime: ties every protocol module to a live transport.
//!
//! The runtime owns a `TransportNode` and all protocol state (presence,
//! field, router, trackers). Applications talk to it through a
//! [`RuntimeHandle`] and observe it through lifecycle events and a field
//! watch channel; they never touch raw frames.

mod effect;
mod executor;
mod r#loop;
mod state;
mod transport;

pub use effect::RuntimeEffect;
pub use state::{Outbound, RuntimeState};
pub use transport::Transport;

use std::net::SocketAddr;
use std::time::Duration;

use lumen_metrics::{Counter, Gauge};
use lumen_transport::{ConnectionId, TransportNode};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use crate::coherence::CoherenceConfig;
use crate::error::ProtocolError;
use crate::events::{EventBus, Subscription};
use crate::field::{FieldConfig, FieldState};
use crate::packet::PacketBuilder;
use crate::presence::{Connection, PresenceConfig};
use crate::router::IntentionRouter;
use crate::security::SecurityConfig;
use crate::signature::{Attunement, IdentitySignature, Key, Mode};

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the protocol runtime.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Identifier stamped as creator on outbound packets and recorded in
    /// route paths.
    pub local_id: String,
    /// Signature announced to every peer after the handshake.
    pub signature: IdentitySignature,
    /// Local field strength the security gate compares senders against.
    pub local_field_strength: f64,
    pub coherence: CoherenceConfig,
    pub presence: PresenceConfig,
    pub security: SecurityConfig,
    pub field: FieldConfig,
    /// Blocked packets tolerated from one peer before it is disconnected.
    pub max_blocks: u32,
    /// Interval of the presence/field decay timer.
    pub pulse_interval: Duration,
    /// Capacity of the lifecycle event bus.
    pub event_buffer: usize,
    /// Packet ids remembered for duplicate suppression.
    pub seen_cache: usize,
    /// Capacity of the command channel.
    pub command_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            local_id: "node".to_string(),
            signature: IdentitySignature::new(
                Mode::Ionian,
                Key::C,
                Attunement::Psi,
                "node",
                "harmonize",
            ),
            local_field_strength: 0.7,
            coherence: CoherenceConfig::default(),
            presence: PresenceConfig::default(),
            security: SecurityConfig::default(),
            field: FieldConfig::default(),
            max_blocks: 5,
            pulse_interval: Duration::from_secs(1),
            event_buffer: 256,
            seen_cache: 4096,
            command_buffer: 64,
        }
    }
}

impl RuntimeConfig {
    /// Admission threshold for both packet scoring and presence.
    ///
    /// The security gate keeps its own thresholds.
    pub fn with_min_coherence(mut self, min_coherence: f64) -> Self {
        self.coherence.min_coherence = min_coherence;
        self.presence.min_coherence = min_coherence;
        self
    }
}

// ── Statistics ────────────────────────────────────────────────────────

/// Runtime counters, exported as JSON by hosts.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RuntimeStats {
    pub frames_received: Counter,
    pub packets_admitted: Counter,
    pub packets_rejected: Counter,
    pub security_blocks: Counter,
    pub decode_failures: Counter,
    pub broadcasts: Counter,
    pub packets_sent: Counter,
    /// Field coherence after the last change, 0–100.
    pub field_coherence: Gauge,
}

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the runtime event loop.
pub enum RuntimeCommand {
    /// Send a packet to one connection.
    Send {
        to: ConnectionId,
        packet: PacketBuilder,
        reply: oneshot::Sender<Result<Uuid, ProtocolError>>,
    },
    /// Send a packet to every established connection.
    Broadcast {
        packet: PacketBuilder,
        reply: oneshot::Sender<Result<Uuid, ProtocolError>>,
    },
    /// Dial a remote node.
    Connect {
        addr: SocketAddr,
        reply: oneshot::Sender<Result<ConnectionId, ProtocolError>>,
    },
    /// Close a connection.
    Close { id: ConnectionId },
    GetConnections {
        reply: oneshot::Sender<Vec<Connection>>,
    },
    GetField { reply: oneshot::Sender<FieldState> },
    GetStats { reply: oneshot::Sender<RuntimeStats> },
    /// Close every connection and stop the loop.
    Shutdown,
}

// ── RuntimeHandle (app-facing API) ───────────────────────────────────

/// Handle to a running [`ProtocolRuntime`].
///
/// Cheap to clone. Every method fails with
/// [`ProtocolError::RuntimeShutdown`] once the loop is gone.
#[derive(Clone)]
pub struct RuntimeHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    bus: EventBus,
}

impl RuntimeHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> RuntimeCommand,
    ) -> Result<T, ProtocolError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| ProtocolError::RuntimeShutdown)?;
        rx.await.map_err(|_| ProtocolError::RuntimeShutdown)
    }

    /// Send a packet to `to`. Resolves to the packet id once queued.
    ///
    /// The creator is always set to the runtime's `local_id`.
    pub async fn send(&self, to: ConnectionId, packet: PacketBuilder) -> Result<Uuid, ProtocolError> {
        self.request(|reply| RuntimeCommand::Send { to, packet, reply })
            .await?
    }

    /// Send an open-field packet to every established connection.
    pub async fn broadcast(&self, packet: PacketBuilder) -> Result<Uuid, ProtocolError> {
        self.request(|reply| RuntimeCommand::Broadcast { packet, reply })
            .await?
    }

    /// Dial `addr`. The connection is registered once this resolves.
    pub async fn connect(&self, addr: SocketAddr) -> Result<ConnectionId, ProtocolError> {
        self.request(|reply| RuntimeCommand::Connect { addr, reply })
            .await?
    }

    pub async fn close(&self, id: ConnectionId) -> Result<(), ProtocolError> {
        self.cmd_tx
            .send(RuntimeCommand::Close { id })
            .await
            .map_err(|_| ProtocolError::RuntimeShutdown)
    }

    /// Every known connection, in id order.
    pub async fn connections(&self) -> Result<Vec<Connection>, ProtocolError> {
        self.request(|reply| RuntimeCommand::GetConnections { reply })
            .await
    }

    pub async fn field(&self) -> Result<FieldState, ProtocolError> {
        self.request(|reply| RuntimeCommand::GetField { reply }).await
    }

    pub async fn stats(&self) -> Result<RuntimeStats, ProtocolError> {
        self.request(|reply| RuntimeCommand::GetStats { reply }).await
    }

    /// A new independent subscription to lifecycle events.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    /// Graceful shutdown. Returns `false` if the loop had already stopped.
    pub async fn shutdown(&self) -> bool {
        match self.cmd_tx.send(RuntimeCommand::Shutdown).await {
            Ok(()) => true,
            Err(_) => {
                tracing::debug!("shutdown requested, runtime already stopped");
                false
            }
        }
    }
}

// ── RuntimeChannels ──────────────────────────────────────────────────

/// Returned to the application when the runtime starts.
pub struct RuntimeChannels {
    pub handle: RuntimeHandle,
    /// Subscribed before the loop started, so no event is missed.
    pub events: Subscription,
    /// Latest field snapshot.
    pub field: watch::Receiver<FieldState>,
    /// Address the transport listens on.
    pub local_addr: SocketAddr,
}

// ── ProtocolRuntime ──────────────────────────────────────────────────

/// The protocol runtime. Spawn it and talk to it through channels.
pub struct ProtocolRuntime;

impl ProtocolRuntime {
    /// Start the runtime with the standard intentions.
    ///
    /// Takes ownership of the node and spawns the event loop as a tokio
    /// task.
    pub fn spawn(node: TransportNode, config: RuntimeConfig) -> RuntimeChannels {
        Self::spawn_with_router(node, config, IntentionRouter::with_defaults())
    }

    pub fn spawn_with_router(
        node: TransportNode,
        config: RuntimeConfig,
        router: IntentionRouter,
    ) -> RuntimeChannels {
        let local_addr = node.local_addr();
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let bus = EventBus::new(config.event_buffer);
        let events = bus.subscribe();

        let state = RuntimeState::new(config).with_router(router);
        let (field_tx, field_rx) = watch::channel(state.field_snapshot());

        tracing::info!(%local_addr, local_id = %state.config.local_id, "protocol runtime starting");
        tokio::spawn(r#loop::runtime_loop(node, state, cmd_rx, bus.clone(), field_tx));

        RuntimeChannels {
            handle: RuntimeHandle { cmd_tx, bus },
            events,
            field: field_rx,
            local_addr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached_handle() -> (RuntimeHandle, mpsc::Receiver<RuntimeCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let handle = RuntimeHandle {
            cmd_tx,
            bus: EventBus::new(4),
        };
        (handle, cmd_rx)
    }

    #[tokio::test]
    async fn shutdown_reports_whether_the_loop_was_running() {
        let (handle, mut cmd_rx) = detached_handle();
        assert!(handle.shutdown().await);
        assert!(matches!(cmd_rx.recv().await, Some(RuntimeCommand::Shutdown)));

        drop(cmd_rx);
        assert!(!handle.shutdown().await);
    }

    #[tokio::test]
    async fn requests_to_a_stopped_loop_fail_cleanly() {
        let (handle, cmd_rx) = detached_handle();
        drop(cmd_rx);
        assert!(matches!(handle.field().await, Err(ProtocolError::RuntimeShutdown)));
        assert!(matches!(
            handle.close(ConnectionId::new(1)).await,
            Err(ProtocolError::RuntimeShutdown)
        ));
    }
}
