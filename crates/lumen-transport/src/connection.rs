use crate::protocol;
use crate::{ConnectionId, TransportConfig, TransportError, TransportEvent};

use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

/// How long a closing connection may spend flushing its outbound queue.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// State shared by the node, its dialers and every connection task.
pub(crate) struct Shared {
    pub config: TransportConfig,
    pub table: ConnectionTable,
    pub events_tx: mpsc::Sender<TransportEvent>,
    next_id: AtomicU64,
}

impl Shared {
    pub fn new(config: TransportConfig, events_tx: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            config,
            table: ConnectionTable::new(),
            events_tx,
            next_id: AtomicU64::new(1),
        }
    }
}

struct ConnectionHandle {
    outbound: mpsc::Sender<Bytes>,
    shutdown: watch::Sender<bool>,
    remote: SocketAddr,
}

/// Live connections, keyed by id. Dropping an entry closes its writer queue.
pub(crate) struct ConnectionTable {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionTable {
    fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Queue a frame without waiting. Fails fast when the queue is full.
    pub async fn send(&self, id: ConnectionId, data: Bytes) -> Result<(), TransportError> {
        let conns = self.connections.lock().await;
        let handle = conns
            .get(&id)
            .ok_or(TransportError::UnknownConnection(id))?;
        handle.outbound.try_send(data).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::Backpressure(id),
            mpsc::error::TrySendError::Closed(_) => TransportError::UnknownConnection(id),
        })
    }

    /// Remove a connection and signal its task to stop. Already queued
    /// frames are still flushed.
    pub async fn close(&self, id: ConnectionId) -> bool {
        match self.connections.lock().await.remove(&id) {
            Some(handle) => {
                let _ = handle.shutdown.send(true);
                true
            }
            None => false,
        }
    }

    pub async fn close_all(&self) {
        let mut conns = self.connections.lock().await;
        for (_, handle) in conns.drain() {
            let _ = handle.shutdown.send(true);
        }
    }

    pub async fn connected(&self) -> Vec<(ConnectionId, SocketAddr)> {
        let conns = self.connections.lock().await;
        let mut list: Vec<_> = conns.iter().map(|(id, h)| (*id, h.remote)).collect();
        list.sort_by_key(|(id, _)| *id);
        list
    }

    async fn insert(&self, id: ConnectionId, handle: ConnectionHandle) {
        self.connections.lock().await.insert(id, handle);
    }

    async fn remove(&self, id: ConnectionId) {
        self.connections.lock().await.remove(&id);
    }
}

/// Register a fresh TCP stream and spawn its connection task.
///
/// `Opened` is queued before the task starts, so it always precedes
/// `HandshakeComplete` for the same id.
pub(crate) async fn open(shared: &Arc<Shared>, stream: TcpStream, remote: SocketAddr) -> ConnectionId {
    let id = ConnectionId::new(shared.next_id.fetch_add(1, Ordering::Relaxed));
    let (outbound, outbound_rx) = mpsc::channel(shared.config.send_buffer);
    let (shutdown, shutdown_rx) = watch::channel(false);

    shared
        .table
        .insert(
            id,
            ConnectionHandle {
                outbound,
                shutdown,
                remote,
            },
        )
        .await;
    let _ = shared
        .events_tx
        .send(TransportEvent::Opened { id, remote })
        .await;

    tracing::debug!(%id, %remote, "connection opened");
    tokio::spawn(run_connection(shared.clone(), id, stream, outbound_rx, shutdown_rx));
    id
}

async fn run_connection(
    shared: Arc<Shared>,
    id: ConnectionId,
    stream: TcpStream,
    outbound_rx: mpsc::Receiver<Bytes>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut writer: Option<JoinHandle<()>> = None;
    let reason = match drive(&shared, id, stream, outbound_rx, &mut shutdown_rx, &mut writer).await {
        Ok(reason) => reason,
        Err(e) => e.to_string(),
    };

    // Dropping the table entry ends the writer queue; let it drain.
    shared.table.remove(id).await;
    if let Some(handle) = writer {
        if tokio::time::timeout(FLUSH_TIMEOUT, handle).await.is_err() {
            tracing::warn!(%id, "outbound queue did not drain before close");
        }
    }

    tracing::debug!(%id, %reason, "connection closed");
    let _ = shared
        .events_tx
        .send(TransportEvent::Closed { id, reason })
        .await;
}

async fn drive(
    shared: &Arc<Shared>,
    id: ConnectionId,
    mut stream: TcpStream,
    outbound_rx: mpsc::Receiver<Bytes>,
    shutdown_rx: &mut watch::Receiver<bool>,
    writer: &mut Option<JoinHandle<()>>,
) -> Result<String, TransportError> {
    let config = &shared.config;

    // ── Handshake ───────────────────────────────────────────────────
    let handshake = tokio::time::timeout(
        config.handshake_timeout,
        protocol::handshake(&mut stream, &config.alpn),
    );
    tokio::select! {
        _ = shutdown_rx.changed() => return Ok("closed locally".to_string()),
        result = handshake => match result {
            Ok(outcome) => outcome?,
            Err(_) => return Err(TransportError::Handshake("timed out".into())),
        },
    }
    let _ = shared
        .events_tx
        .send(TransportEvent::HandshakeComplete { id })
        .await;

    // ── Frames ──────────────────────────────────────────────────────
    let (mut reader, write_half) = stream.into_split();
    *writer = Some(tokio::spawn(write_loop(
        write_half,
        outbound_rx,
        shared.events_tx.clone(),
        id,
    )));

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => return Ok("closed locally".to_string()),
            frame = protocol::read_framed(&mut reader, config.max_frame_size) => match frame {
                Ok(data) => {
                    let _ = shared.events_tx.send(TransportEvent::Frame { id, data }).await;
                }
                Err(TransportError::FrameTooLarge { size, max }) => {
                    tracing::warn!(%id, size, max, "dropping oversized frame");
                    let _ = shared
                        .events_tx
                        .send(TransportEvent::Fault {
                            id,
                            reason: format!("frame of {size} bytes exceeds {max}"),
                        })
                        .await;
                }
                Err(TransportError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Ok("peer disconnected".to_string());
                }
                Err(e) => return Err(e),
            },
        }
    }
}

/// Drain the outbound queue in FIFO order. Ends when the queue is closed.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    events_tx: mpsc::Sender<TransportEvent>,
    id: ConnectionId,
) {
    use tokio::io::AsyncWriteExt;

    while let Some(data) = outbound_rx.recv().await {
        if let Err(e) = protocol::write_framed(&mut writer, &data).await {
            tracing::warn!(%id, "write failed: {e}");
            let _ = events_tx
                .send(TransportEvent::Fault {
                    id,
                    reason: format!("write failed: {e}"),
                })
                .await;
            return;
        }
    }
    let _ = writer.shutdown().await;
}
