use bytes::Bytes;
use lumen_transport::{ConnectionId, TransportNode};

/// Network seam for the runtime executor.
///
/// In production: implemented by [`TransportNode`].
/// In tests: [`mock::MockTransport`] records what would have been sent.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Queue bytes on a connection. Never waits on the socket.
    async fn send(&self, to: ConnectionId, data: Bytes) -> Result<(), String>;

    /// Close a connection; `false` if it was already gone.
    async fn close(&self, id: ConnectionId) -> bool;
}

// ── TransportNode (production) ──────────────────────────────────────

#[async_trait::async_trait]
impl Transport for TransportNode {
    async fn send(&self, to: ConnectionId, data: Bytes) -> Result<(), String> {
        TransportNode::send(self, to, data)
            .await
            .map_err(|e| e.to_string())
    }

    async fn close(&self, id: ConnectionId) -> bool {
        TransportNode::close(self, id).await
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        sent: Vec<(ConnectionId, Bytes)>,
        closed: Vec<ConnectionId>,
    }

    /// Remembers every send and close instead of touching a socket.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        log: Arc<Mutex<Log>>,
        refuse: Arc<AtomicBool>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent(&self) -> Vec<(ConnectionId, Bytes)> {
            self.log.lock().unwrap().sent.clone()
        }

        pub fn closed(&self) -> Vec<ConnectionId> {
            self.log.lock().unwrap().closed.clone()
        }

        /// Make every following send fail, as a full or dead queue would.
        pub fn set_fail_sends(&self, fail: bool) {
            self.refuse.store(fail, Ordering::Relaxed);
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send(&self, to: ConnectionId, data: Bytes) -> Result<(), String> {
            if self.refuse.load(Ordering::Relaxed) {
                return Err(format!("{to}: outbound queue refused"));
            }
            self.log.lock().unwrap().sent.push((to, data));
            Ok(())
        }

        async fn close(&self, id: ConnectionId) -> bool {
            self.log.lock().unwrap().closed.push(id);
            true
        }
    }
}
