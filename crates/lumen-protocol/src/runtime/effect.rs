use bytes::Bytes;
use lumen_transport::ConnectionId;

use crate::events::LifecycleEvent;
use crate::field::FieldState;

/// An action decided by [`RuntimeState`](super::RuntimeState).
///
/// Every `handle_*` / `tick_*` method returns a list of these; the event
/// loop hands them to the executor, which is the only code touching I/O.
#[derive(Debug, Clone)]
pub enum RuntimeEffect {
    /// Queue an encoded frame on a connection.
    Send { to: ConnectionId, bytes: Bytes },
    /// Close a transport connection after flushing its queue.
    Close(ConnectionId),
    /// Publish a lifecycle event to subscribers.
    Emit(LifecycleEvent),
    /// Replace the field snapshot seen by watchers.
    PublishField(FieldState),
}
