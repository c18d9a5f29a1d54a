//! Effect executor: the only place that touches I/O.
//!
//! - `Send` -> transport.send()
//! - `Close` -> transport.close()
//! - `Emit` -> event bus
//! - `PublishField` -> field watch channel

use tokio::sync::watch;

use crate::events::EventBus;
use crate::field::FieldState;

use super::effect::RuntimeEffect;
use super::transport::Transport;

/// Execute effects in order.
///
/// Failures are logged, never propagated: a full or vanished connection is
/// a per-connection problem, and the transport reports closures as events.
pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<RuntimeEffect>,
    transport: &T,
    bus: &EventBus,
    field_tx: &watch::Sender<FieldState>,
) {
    for effect in effects {
        match effect {
            RuntimeEffect::Send { to, bytes } => {
                if let Err(e) = transport.send(to, bytes).await {
                    tracing::warn!(connection = %to, "send failed: {e}");
                }
            }
            RuntimeEffect::Close(id) => {
                if !transport.close(id).await {
                    tracing::debug!(connection = %id, "close: connection already gone");
                }
            }
            RuntimeEffect::Emit(event) => {
                tracing::debug!(event = event.name(), "lifecycle event");
                bus.publish(event);
            }
            RuntimeEffect::PublishField(state) => {
                field_tx.send_replace(state);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LifecycleEvent;
    use crate::field::FieldAggregator;
    use crate::runtime::transport::mock::MockTransport;
    use bytes::Bytes;
    use lumen_transport::ConnectionId;
    use uuid::Uuid;

    #[tokio::test]
    async fn effects_reach_their_sinks_in_order() {
        let transport = MockTransport::new();
        let bus = EventBus::new(8);
        let mut sub = bus.subscribe();
        let initial = FieldAggregator::default().snapshot();
        let (field_tx, field_rx) = watch::channel(initial.clone());

        let mut moved = initial.clone();
        moved.coherence = 61.0;
        let abandoned = LifecycleEvent::PacketAbandoned {
            connection: ConnectionId::new(2),
            packet_id: Uuid::nil(),
        };

        execute_effects(
            vec![
                RuntimeEffect::Send {
                    to: ConnectionId::new(1),
                    bytes: Bytes::from_static(b"one"),
                },
                RuntimeEffect::Send {
                    to: ConnectionId::new(1),
                    bytes: Bytes::from_static(b"two"),
                },
                RuntimeEffect::Close(ConnectionId::new(2)),
                RuntimeEffect::Emit(abandoned.clone()),
                RuntimeEffect::PublishField(moved.clone()),
            ],
            &transport,
            &bus,
            &field_tx,
        )
        .await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].1, Bytes::from_static(b"one"));
        assert_eq!(sent[1].1, Bytes::from_static(b"two"));
        assert_eq!(transport.closed(), vec![ConnectionId::new(2)]);
        assert_eq!(sub.try_recv(), Some(abandoned));
        assert_eq!(*field_rx.borrow(), moved);
    }

    #[tokio::test]
    async fn send_failures_do_not_stop_execution() {
        let transport = MockTransport::new();
        transport.set_fail_sends(true);
        let bus = EventBus::new(8);
        let (field_tx, _rx) = watch::channel(FieldAggregator::default().snapshot());

        execute_effects(
            vec![
                RuntimeEffect::Send {
                    to: ConnectionId::new(1),
                    bytes: Bytes::from_static(b"lost"),
                },
                RuntimeEffect::Close(ConnectionId::new(1)),
            ],
            &transport,
            &bus,
            &field_tx,
        )
        .await;

        assert!(transport.sent().is_empty());
        assert_eq!(transport.closed(), vec![ConnectionId::new(1)]);
    }
}
