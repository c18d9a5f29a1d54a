use std::net::SocketAddr;

use crate::ConnectionId;

/// Errors returned by the Lumen transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("outbound queue full for {0}")]
    Backpressure(ConnectionId),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("node is shut down")]
    Shutdown,
}
