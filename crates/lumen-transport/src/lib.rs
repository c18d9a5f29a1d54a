//! Lumen transport layer.
//!
//! Persistent, ordered, bidirectional byte streams over TCP. Every frame is
//! length-prefixed; every connection starts with an ALPN preamble exchange
//! that plays the role of the transport handshake. The protocol layer sits
//! above [`TransportNode`] and never sees sockets.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use lumen_transport::{TransportConfig, TransportEvent, TransportNode};
//!
//! # async fn example() -> Result<(), lumen_transport::TransportError> {
//! let mut node = TransportNode::bind("127.0.0.1:0".parse().unwrap(), TransportConfig::new()).await?;
//! let peer = node.connect("127.0.0.1:7400".parse().unwrap()).await?;
//! node.send(peer, b"hello".to_vec().into()).await?;
//!
//! while let Some(event) = node.recv().await {
//!     if let TransportEvent::Frame { id, data } = event {
//!         println!("{id}: {} bytes", data.len());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod error;
mod node;
mod protocol;

pub use config::TransportConfig;
pub use error::TransportError;
pub use node::{Dialer, TransportNode};

use std::fmt;
use std::net::SocketAddr;

/// Local handle for one transport connection.
///
/// Allocated by the node that owns the connection; never reused during the
/// lifetime of a [`TransportNode`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw identifier.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw identifier.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Events surfaced by a [`TransportNode`], in per-connection order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A TCP connection exists (inbound accept or outbound connect).
    Opened { id: ConnectionId, remote: SocketAddr },
    /// Both sides exchanged matching ALPN preambles.
    HandshakeComplete { id: ConnectionId },
    /// One complete inbound frame.
    Frame { id: ConnectionId, data: Vec<u8> },
    /// Partial failure; the connection is still usable.
    Fault { id: ConnectionId, reason: String },
    /// The connection is gone. No further events follow for `id`.
    Closed { id: ConnectionId, reason: String },
}

impl TransportEvent {
    /// The connection this event belongs to.
    pub fn connection(&self) -> ConnectionId {
        match self {
            TransportEvent::Opened { id, .. }
            | TransportEvent::HandshakeComplete { id }
            | TransportEvent::Frame { id, .. }
            | TransportEvent::Fault { id, .. }
            | TransportEvent::Closed { id, .. } => *id,
        }
    }
}

/// ALPN protocol identifier written as the first frame on every connection.
pub const LUMEN_ALPN: &[u8] = b"lumen/presence/1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_display_and_serde() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
        assert_eq!(format!("{id:?}"), "ConnectionId(7)");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: ConnectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn event_reports_its_connection() {
        let id = ConnectionId::new(3);
        let event = TransportEvent::Fault {
            id,
            reason: "oversized".into(),
        };
        assert_eq!(event.connection(), id);
    }
}
