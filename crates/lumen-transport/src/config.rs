use std::time::Duration;

/// Configuration for a [`TransportNode`](crate::TransportNode).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use lumen_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .max_frame_size(2 * 1024 * 1024)
///     .recv_buffer(512);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// ALPN preamble exchanged on connect.
    pub(crate) alpn: Vec<u8>,
    /// Maximum frame size in bytes, both directions.
    pub(crate) max_frame_size: usize,
    /// Channel buffer for inbound events.
    pub(crate) recv_buffer: usize,
    /// Per-connection outbound queue depth.
    pub(crate) send_buffer: usize,
    /// How long a peer has to answer the preamble.
    pub(crate) handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self {
            alpn: crate::LUMEN_ALPN.to_vec(),
            max_frame_size: 1024 * 1024, // 1 MB
            recv_buffer: 256,
            send_buffer: 64,
            handshake_timeout: Duration::from_secs(10),
        }
    }

    /// Set the ALPN preamble.
    pub fn alpn(mut self, alpn: &[u8]) -> Self {
        self.alpn = alpn.to_vec();
        self
    }

    /// Set maximum frame size (default: 1 MB).
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Set the inbound event buffer (default: 256).
    pub fn recv_buffer(mut self, capacity: usize) -> Self {
        self.recv_buffer = capacity;
        self
    }

    /// Set the per-connection outbound queue depth (default: 64).
    ///
    /// A full queue makes `send` fail with
    /// [`TransportError::Backpressure`](crate::TransportError::Backpressure)
    /// instead of waiting.
    pub fn send_buffer(mut self, capacity: usize) -> Self {
        self.send_buffer = capacity;
        self
    }

    /// Set the handshake timeout (default: 10 s).
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}
