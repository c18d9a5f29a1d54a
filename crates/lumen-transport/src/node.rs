use crate::connection::{self, Shared};
use crate::{ConnectionId, TransportConfig, TransportError, TransportEvent};

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A Lumen transport node — listen, connect, send, receive.
///
/// Owns the listener and every connection task. Inbound traffic for all
/// connections is multiplexed onto one event channel read with
/// [`recv`](Self::recv).
pub struct TransportNode {
    shared: Arc<Shared>,
    events_rx: mpsc::Receiver<TransportEvent>,
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl TransportNode {
    /// Bind a listener and start accepting connections.
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(TransportError::Bind)?;
        let local_addr = listener.local_addr().map_err(TransportError::Bind)?;

        let (events_tx, events_rx) = mpsc::channel(config.recv_buffer);
        let shared = Arc::new(Shared::new(config, events_tx));

        let accept_task = tokio::spawn(accept_loop(listener, shared.clone()));
        tracing::info!(%local_addr, "transport listening");

        Ok(Self {
            shared,
            events_rx,
            local_addr,
            accept_task,
        })
    }

    /// The address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A cloneable handle that can open outbound connections from another task.
    pub fn dialer(&self) -> Dialer {
        Dialer {
            shared: self.shared.clone(),
        }
    }

    /// Open an outbound connection.
    pub async fn connect(&self, addr: SocketAddr) -> Result<ConnectionId, TransportError> {
        self.dialer().connect(addr).await
    }

    /// Queue a frame on a connection's ordered outbound queue.
    ///
    /// Never waits on the socket: a full queue yields
    /// [`TransportError::Backpressure`].
    pub async fn send(&self, id: ConnectionId, data: Bytes) -> Result<(), TransportError> {
        let max = self.shared.config.max_frame_size;
        if data.len() > max {
            return Err(TransportError::FrameTooLarge {
                size: data.len(),
                max,
            });
        }
        self.shared.table.send(id, data).await
    }

    /// Close a connection after flushing what is already queued.
    ///
    /// Returns `false` if the connection was unknown or already gone.
    pub async fn close(&self, id: ConnectionId) -> bool {
        self.shared.table.close(id).await
    }

    /// Currently open connections and their remote addresses.
    pub async fn connections(&self) -> Vec<(ConnectionId, SocketAddr)> {
        self.shared.table.connected().await
    }

    /// Receive the next transport event. Blocks until one arrives.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events_rx.recv().await
    }

    /// Stop accepting and close every connection.
    pub async fn shutdown(self) -> Result<(), TransportError> {
        self.accept_task.abort();
        self.shared.table.close_all().await;
        tracing::info!(local_addr = %self.local_addr, "transport shut down");
        Ok(())
    }
}

impl Drop for TransportNode {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

/// Opens outbound connections on behalf of a [`TransportNode`].
#[derive(Clone)]
pub struct Dialer {
    shared: Arc<Shared>,
}

impl Dialer {
    /// Connect to `addr`. The handshake continues in the background and is
    /// reported as [`TransportEvent::HandshakeComplete`].
    pub async fn connect(&self, addr: SocketAddr) -> Result<ConnectionId, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Connect { addr, source })?;
        let _ = stream.set_nodelay(true);
        Ok(connection::open(&self.shared, stream, addr).await)
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let _ = stream.set_nodelay(true);
                connection::open(&shared, stream, remote).await;
            }
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}
