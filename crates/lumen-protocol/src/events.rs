//! Lifecycle events for host applications.
//!
//! Published on a `tokio::sync::broadcast` channel. Each subscriber owns
//! its [`Subscription`]; dropping it unsubscribes. A subscriber that falls
//! behind skips the events it missed rather than stalling the runtime.

use lumen_transport::ConnectionId;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::control::ControlFrame;
use crate::field::FieldState;
use crate::packet::Packet;
use crate::presence::Connection;
use crate::security::TransmutationAction;

/// Why an inbound frame was not admitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Rejection {
    Decode { message: String },
    Validation { fields: Vec<String> },
    Admission { score: f64, recommendations: Vec<String> },
    Security { action: TransmutationAction, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "event")]
pub enum LifecycleEvent {
    ConnectionEstablished {
        connection: Connection,
    },
    PresenceFading {
        connection: Connection,
    },
    PacketAdmitted {
        connection: ConnectionId,
        score: f64,
        packet: Box<Packet>,
    },
    PacketRejected {
        connection: ConnectionId,
        packet_id: Option<Uuid>,
        rejection: Rejection,
    },
    FieldStateChanged {
        field: FieldState,
    },
    ConnectionClosed {
        connection: Connection,
        reason: String,
    },
    /// No answer arrived inside the packet's timing window.
    PacketAbandoned {
        connection: ConnectionId,
        packet_id: Uuid,
    },
    /// A peer answered one of our packets with a control frame.
    PeerResponse {
        connection: ConnectionId,
        response: ControlFrame,
    },
}

impl LifecycleEvent {
    /// Wire name, e.g. `packet-admitted`.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ConnectionEstablished { .. } => "connection-established",
            LifecycleEvent::PresenceFading { .. } => "presence-fading",
            LifecycleEvent::PacketAdmitted { .. } => "packet-admitted",
            LifecycleEvent::PacketRejected { .. } => "packet-rejected",
            LifecycleEvent::FieldStateChanged { .. } => "field-state-changed",
            LifecycleEvent::ConnectionClosed { .. } => "connection-closed",
            LifecycleEvent::PacketAbandoned { .. } => "packet-abandoned",
            LifecycleEvent::PeerResponse { .. } => "peer-response",
        }
    }
}

/// Fan-out of lifecycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, event: LifecycleEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's view of the bus.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<LifecycleEvent>,
}

impl Subscription {
    /// Next event. `None` once the runtime is gone.
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant; `None` when nothing is queued.
    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagging, events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    fn field_event(c: f64) -> LifecycleEvent {
        LifecycleEvent::FieldStateChanged {
            field: FieldState {
                coherence: c,
                dominant_mode: None,
                active_nodes: 0,
                history: VecDeque::new(),
            },
        }
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let bus = EventBus::new(16);
        let mut sub = bus.subscribe();
        assert_eq!(bus.publish(field_event(1.0)), 1);
        bus.publish(field_event(2.0));
        assert_eq!(sub.recv().await, Some(field_event(1.0)));
        assert_eq!(sub.recv().await, Some(field_event(2.0)));
    }

    #[tokio::test]
    async fn dropping_the_bus_ends_subscriptions() {
        let bus = EventBus::new(4);
        let mut sub = bus.subscribe();
        drop(bus);
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(field_event(1.0)), 0);
        let sub = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn lagging_subscriber_skips_ahead() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();
        for i in 0..5 {
            bus.publish(field_event(i as f64));
        }
        assert_eq!(sub.try_recv(), Some(field_event(3.0)));
        assert_eq!(sub.try_recv(), Some(field_event(4.0)));
        assert_eq!(sub.try_recv(), None);
    }

    #[test]
    fn wire_names() {
        let event = LifecycleEvent::PacketRejected {
            connection: ConnectionId::new(3),
            packet_id: None,
            rejection: Rejection::Decode {
                message: "eof".into(),
            },
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "packet-rejected");
        assert_eq!(value["rejection"]["kind"], "decode");
        assert_eq!(event.name(), "packet-rejected");
    }
}
