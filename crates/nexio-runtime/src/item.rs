//! Worker items
//!
//! A worker item is anything bound to a worker by id: connection handlers,
//! reconnecting clients, worker-local services. An item belongs to exactly
//! one worker and all of its state is mutated on that worker's thread.

use std::any::Any;
use std::time::Duration;

use tracing::debug;

use nexio_core::{ItemId, WorkerId};

use crate::command::{ReplyHandle, WorkerRef};
use crate::handler::ConnectionHandler;

/// Opaque message payload delivered to items
pub type Payload = Box<dyn Any + Send>;

/// Identity of a bound item: its id and the worker that owns it
///
/// Created by the I/O system when the item is bound; immutable thereafter.
#[derive(Clone, Debug)]
pub struct Context {
    id: ItemId,
    worker: WorkerRef,
}

impl Context {
    pub fn new(id: ItemId, worker: WorkerRef) -> Self {
        Self { id, worker }
    }

    /// The item's process-unique id
    #[inline]
    pub fn id(&self) -> ItemId {
        self.id
    }

    /// Handle to the owning worker
    #[inline]
    pub fn worker(&self) -> &WorkerRef {
        &self.worker
    }

    /// Id of the owning worker
    #[inline]
    pub fn worker_id(&self) -> WorkerId {
        self.worker.id()
    }
}

/// Anything bound to a worker by id
///
/// Lifecycle: created with a `Context`, bound exactly once, unbound exactly
/// once (except connection handlers with the manual-unbind capability, which
/// stay bound across error-class disconnects to allow reconnection).
pub trait WorkerItem: Send {
    /// The context this item was created with
    fn context(&self) -> &Context;

    /// The item's id, from its context
    fn id(&self) -> ItemId {
        self.context().id()
    }

    /// Called on the worker thread when the item is bound
    fn on_bind(&mut self) {}

    /// Called on the worker thread when the item is unbound
    fn on_unbind(&mut self) {}

    /// Deliver an opaque payload with the sender's reply channel
    ///
    /// The default drops the payload; items that expect messages override.
    fn on_message(&mut self, payload: Payload, reply: &ReplyHandle) {
        let _ = (payload, reply);
        debug!(id = %self.context().id(), "message dropped by item without a receiver");
    }

    /// Periodic idle-check hook, invoked with the configured sweep period
    fn on_idle_check(&mut self, period: Duration) {
        let _ = period;
    }

    /// Capability probe: the connection-handler view of this item, if any
    ///
    /// Items that can own a connection return `Some(self)`.
    fn as_handler(&mut self) -> Option<&mut dyn ConnectionHandler> {
        None
    }
}
