//! Acknowledgement tracker for outbound packets.
//!
//! Remembers packets that expect an answer and reports the ones whose
//! timing window ran out. Abandonment is only reported: the protocol
//! never retransmits, retry policy belongs to the caller.
//!
//! Pure logic, no I/O. Times are Unix milliseconds supplied by the caller.

use std::collections::HashMap;
use std::time::Duration;

use lumen_transport::ConnectionId;
use uuid::Uuid;

/// Maximum number of tracked packets.
pub const MAX_TRACKED: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Pending {
    connection: ConnectionId,
    /// `None` waits forever.
    deadline_ms: Option<u64>,
}

#[derive(Debug, Default)]
pub struct AckTracker {
    pending: HashMap<Uuid, Pending>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start waiting for an answer to `packet_id`.
    ///
    /// Returns `false` when at capacity; the packet is still sent, just
    /// not tracked.
    pub fn track(
        &mut self,
        packet_id: Uuid,
        connection: ConnectionId,
        timeout: Option<Duration>,
        now_ms: u64,
    ) -> bool {
        if self.pending.len() >= MAX_TRACKED && !self.pending.contains_key(&packet_id) {
            return false;
        }
        let deadline_ms = timeout.map(|t| now_ms.saturating_add(t.as_millis() as u64));
        self.pending.insert(
            packet_id,
            Pending {
                connection,
                deadline_ms,
            },
        );
        true
    }

    /// An answer referencing `packet_id` arrived.
    pub fn acknowledge(&mut self, packet_id: &Uuid) -> bool {
        self.pending.remove(packet_id).is_some()
    }

    /// Remove and return every packet whose window has passed.
    pub fn sweep(&mut self, now_ms: u64) -> Vec<(Uuid, ConnectionId)> {
        let mut expired: Vec<(Uuid, ConnectionId)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline_ms.is_some_and(|d| now_ms >= d))
            .map(|(id, p)| (*id, p.connection))
            .collect();
        for (id, _) in &expired {
            self.pending.remove(id);
        }
        expired.sort_by_key(|(_, conn)| *conn);
        expired
    }

    /// Drop everything waiting on a closed connection, returning the ids.
    pub fn forget_connection(&mut self, connection: ConnectionId) -> Vec<Uuid> {
        let mut dropped: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, p)| p.connection == connection)
            .map(|(id, _)| *id)
            .collect();
        for id in &dropped {
            self.pending.remove(id);
        }
        dropped.sort();
        dropped
    }

    pub fn is_tracking(&self, packet_id: &Uuid) -> bool {
        self.pending.contains_key(packet_id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn acknowledged_packets_never_expire() {
        let mut t = AckTracker::new();
        assert!(t.track(id(1), ConnectionId::new(1), Some(Duration::from_millis(100)), 0));
        assert!(t.acknowledge(&id(1)));
        assert!(!t.acknowledge(&id(1)));
        assert!(t.sweep(1_000).is_empty());
    }

    #[test]
    fn sweep_reports_expired_once() {
        let mut t = AckTracker::new();
        t.track(id(1), ConnectionId::new(1), Some(Duration::from_millis(100)), 0);
        t.track(id(2), ConnectionId::new(2), Some(Duration::from_millis(500)), 0);
        assert!(t.sweep(99).is_empty());
        assert_eq!(t.sweep(100), vec![(id(1), ConnectionId::new(1))]);
        assert!(t.sweep(100).is_empty());
        assert!(t.is_tracking(&id(2)));
    }

    #[test]
    fn unbounded_never_expires() {
        let mut t = AckTracker::new();
        t.track(id(1), ConnectionId::new(1), None, 0);
        assert!(t.sweep(u64::MAX).is_empty());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn forget_connection_drops_its_packets() {
        let mut t = AckTracker::new();
        t.track(id(1), ConnectionId::new(1), None, 0);
        t.track(id(2), ConnectionId::new(2), None, 0);
        t.track(id(3), ConnectionId::new(1), None, 0);
        assert_eq!(t.forget_connection(ConnectionId::new(1)), vec![id(1), id(3)]);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn capacity_is_bounded() {
        let mut t = AckTracker::new();
        for n in 0..MAX_TRACKED as u128 {
            assert!(t.track(id(n), ConnectionId::new(1), None, 0));
        }
        assert!(!t.track(id(u128::MAX), ConnectionId::new(1), None, 0));
        // re-tracking a known id is still allowed
        assert!(t.track(id(0), ConnectionId::new(1), None, 0));
    }
}
