use std::collections::HashMap;

use lumen_transport::ConnectionId;

use super::connection::{Connection, ConnectionState};

/// Arena of connection records with an id → slot index.
///
/// Closed records stay in place until [`sweep_closed`](Self::sweep_closed)
/// evicts them, so late events for a closed id still find its final state.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    slots: Vec<Option<Connection>>,
    free: Vec<usize>,
    index: HashMap<ConnectionId, usize>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, replacing any with the same id.
    pub fn insert(&mut self, connection: Connection) -> Option<Connection> {
        if let Some(&slot) = self.index.get(&connection.id) {
            return self.slots[slot].replace(connection);
        }
        let id = connection.id;
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(connection);
                slot
            }
            None => {
                self.slots.push(Some(connection));
                self.slots.len() - 1
            }
        };
        self.index.insert(id, slot);
        None
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        let slot = *self.index.get(id)?;
        self.slots.get(slot)?.as_ref()
    }

    pub fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        let slot = *self.index.get(id)?;
        self.slots.get_mut(slot)?.as_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.slots.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Present and not Closed.
    pub fn is_open(&self, id: &ConnectionId) -> bool {
        self.get(id).is_some_and(Connection::is_open)
    }

    /// Established connections in id order, optionally excluding one.
    /// Degraded members are left out: they are not sent new traffic.
    pub fn established_ids(&self, except: Option<ConnectionId>) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self
            .iter()
            .filter(|c| c.state == ConnectionState::Established && Some(c.id) != except)
            .map(|c| c.id)
            .collect();
        ids.sort();
        ids
    }

    /// Evict every Closed record, returning their ids.
    pub fn sweep_closed(&mut self) -> Vec<ConnectionId> {
        let mut evicted = Vec::new();
        for (slot, entry) in self.slots.iter_mut().enumerate() {
            if entry
                .as_ref()
                .is_some_and(|c| c.state == ConnectionState::Closed)
            {
                if let Some(c) = entry.take() {
                    self.index.remove(&c.id);
                    self.free.push(slot);
                    evicted.push(c.id);
                }
            }
        }
        evicted
    }
}
