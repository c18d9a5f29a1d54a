//! The protocol runtime event loop.
//!
//! A single task owns [`RuntimeState`] and multiplexes transport events,
//! application commands and the pulse timer. State transitions are pure;
//! everything they decide goes through the executor.

use tokio::sync::{mpsc, watch};

use lumen_transport::TransportNode;

use crate::error::ProtocolError;
use crate::events::EventBus;
use crate::field::FieldState;
use crate::types::now_ms;

use super::executor::execute_effects;
use super::state::RuntimeState;
use super::RuntimeCommand;

pub(super) async fn runtime_loop(
    mut node: TransportNode,
    mut state: RuntimeState,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    bus: EventBus,
    field_tx: watch::Sender<FieldState>,
) {
    let mut pulse = tokio::time::interval(state.config.pulse_interval);
    pulse.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick
    pulse.tick().await;

    loop {
        // Biased: a connection's Opened event is always handled before a
        // command that was issued after dialing it.
        tokio::select! {
            biased;

            // ── 1. Transport ────────────────────────────────────
            event = node.recv() => {
                let Some(event) = event else {
                    tracing::warn!("transport event channel closed, stopping runtime");
                    break;
                };
                let effects = state.handle_transport(event, now_ms());
                execute_effects(effects, &node, &bus, &field_tx).await;
            }

            // ── 2. Application commands ─────────────────────────
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::info!("all runtime handles dropped, stopping runtime");
                    break;
                };
                match cmd {
                    RuntimeCommand::Send { to, packet, reply } => {
                        let result = match state.send_packet(to, packet, now_ms()) {
                            Ok(out) => {
                                execute_effects(out.effects, &node, &bus, &field_tx).await;
                                Ok(out.packet_id)
                            }
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    RuntimeCommand::Broadcast { packet, reply } => {
                        let result = match state.broadcast_packet(packet, now_ms()) {
                            Ok(out) => {
                                execute_effects(out.effects, &node, &bus, &field_tx).await;
                                Ok(out.packet_id)
                            }
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    RuntimeCommand::Connect { addr, reply } => {
                        // Dialing waits on the network; never block the loop on it.
                        let dialer = node.dialer();
                        tokio::spawn(async move {
                            let result = dialer.connect(addr).await.map_err(ProtocolError::from);
                            if let Err(e) = &result {
                                tracing::warn!(%addr, "connect failed: {e}");
                            }
                            let _ = reply.send(result);
                        });
                    }
                    RuntimeCommand::Close { id } => {
                        let effects = state.close_connection(id, "closed by application");
                        execute_effects(effects, &node, &bus, &field_tx).await;
                    }
                    RuntimeCommand::GetConnections { reply } => {
                        let _ = reply.send(state.connections());
                    }
                    RuntimeCommand::GetField { reply } => {
                        let _ = reply.send(state.field_snapshot());
                    }
                    RuntimeCommand::GetStats { reply } => {
                        let _ = reply.send(state.stats().clone());
                    }
                    RuntimeCommand::Shutdown => {
                        tracing::info!("runtime shutdown requested");
                        break;
                    }
                }
            }

            // ── 3. Pulse ────────────────────────────────────────
            _ = pulse.tick() => {
                let effects = state.tick_pulse(now_ms());
                execute_effects(effects, &node, &bus, &field_tx).await;
            }
        }
    }

    let effects = state.shutdown();
    execute_effects(effects, &node, &bus, &field_tx).await;
    if let Err(e) = node.shutdown().await {
        tracing::warn!("transport shutdown: {e}");
    }
    tracing::info!("protocol runtime stopped");
}
