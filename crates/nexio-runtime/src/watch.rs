//! Watched-handler bridge
//!
//! Tracks the liveness tokens of watched connection handlers. The worker
//! scans the table once per loop iteration; any token whose guard has died
//! gets its connection closed with `DisconnectCause::Disconnect`.

use std::collections::HashMap;

use nexio_core::{ItemId, LivenessToken};

/// Liveness tokens of the worker's watched connections
#[derive(Default)]
pub struct WatchTable {
    watched: HashMap<ItemId, LivenessToken>,
}

impl WatchTable {
    pub fn new() -> Self {
        Self {
            watched: HashMap::new(),
        }
    }

    /// Start observing a handler's token
    pub fn watch(&mut self, id: ItemId, token: LivenessToken) {
        self.watched.insert(id, token);
    }

    /// Stop observing (connection closed or handler unbound)
    pub fn unwatch(&mut self, id: ItemId) {
        self.watched.remove(&id);
    }

    /// Collect and remove every id whose token has died
    pub fn scan(&mut self) -> Vec<ItemId> {
        if self.watched.is_empty() {
            return Vec::new();
        }
        let dead: Vec<ItemId> = self
            .watched
            .iter()
            .filter(|(_, token)| token.is_dead())
            .map(|(id, _)| *id)
            .collect();
        for id in &dead {
            self.watched.remove(id);
        }
        dead
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.watched.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }
}
