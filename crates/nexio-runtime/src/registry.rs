//! Worker item registry
//!
//! Maps item ids to bound items. Ids are assigned by the I/O system and are
//! globally unique within it; the same id appearing twice is a programming
//! error. All operations execute on the owning worker's thread.

use std::collections::HashMap;
use std::time::Duration;

use tracing::{error, warn};

use nexio_core::{ItemId, WorkerError, WorkerResult};

use crate::item::WorkerItem;

/// Registry of items bound to one worker
#[derive(Default)]
pub struct ItemRegistry {
    items: HashMap<ItemId, Box<dyn WorkerItem>>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self {
            items: HashMap::new(),
        }
    }

    /// Bind an item; rejects double-bind
    pub fn bind(&mut self, mut item: Box<dyn WorkerItem>) -> WorkerResult<()> {
        let id = item.id();
        if self.items.contains_key(&id) {
            error!(%id, "double bind rejected");
            return Err(WorkerError::AlreadyBound(id));
        }
        item.on_bind();
        self.items.insert(id, item);
        Ok(())
    }

    /// Unbind an item; rejects unknown ids
    pub fn unbind(&mut self, id: ItemId) -> WorkerResult<Box<dyn WorkerItem>> {
        match self.items.remove(&id) {
            Some(mut item) => {
                item.on_unbind();
                Ok(item)
            }
            None => {
                warn!(%id, "unbind of unknown item");
                Err(WorkerError::UnknownItem(id))
            }
        }
    }

    /// Swap the item bound under the new item's id
    ///
    /// Unbinds the existing item, then binds the new one. Returns whether a
    /// swap occurred; with no existing item nothing is bound.
    pub fn replace(&mut self, mut item: Box<dyn WorkerItem>) -> bool {
        let id = item.id();
        match self.items.remove(&id) {
            Some(mut old) => {
                old.on_unbind();
                item.on_bind();
                self.items.insert(id, item);
                true
            }
            None => false,
        }
    }

    /// Borrow a bound item
    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut (dyn WorkerItem + '_)> {
        self.items
            .get_mut(&id)
            .map(|item| &mut **item as &mut dyn WorkerItem)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Invoke the idle-check hook on every bound item
    pub fn idle_check(&mut self, period: Duration) {
        for item in self.items.values_mut() {
            item.on_idle_check(period);
        }
    }

    /// Unbind everything; used at worker shutdown
    pub fn clear(&mut self) {
        for (_, mut item) in self.items.drain() {
            item.on_unbind();
        }
    }
}
