//! Server handles and the per-worker initializer registry
//!
//! A `ServerHandle` identifies a registered server and carries the channel
//! its refusals and replies travel on. Each worker keeps its own
//! `InitializerRegistry`: the server's initializer is constructed inside the
//! worker at registration time so its state stays worker-local.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::warn;

use nexio_core::ServerId;

use crate::command::{InitializerFactory, WorkerNotification};
use crate::handler::Initializer;
use crate::item::Payload;

/// Identity of a registered server plus its notification channel
#[derive(Clone)]
pub struct ServerHandle {
    id: ServerId,
    name: Arc<str>,
    notifications: Sender<WorkerNotification>,
}

impl ServerHandle {
    pub fn new(id: ServerId, name: &str, notifications: Sender<WorkerNotification>) -> Self {
        Self {
            id,
            name: Arc::from(name),
            notifications,
        }
    }

    #[inline]
    pub fn id(&self) -> ServerId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Best-effort notification to the server's owner
    pub fn notify(&self, note: WorkerNotification) {
        let _ = self.notifications.send(note);
    }

    /// Reply handle routing onto the server's notification channel
    pub fn reply_handle(&self) -> crate::command::ReplyHandle {
        crate::command::ReplyHandle::new(self.notifications.clone())
    }
}

impl fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

struct ServerEntry {
    handle: ServerHandle,
    initializer: Box<dyn Initializer>,
}

/// Per-worker registry of server initializers
#[derive(Default)]
pub struct InitializerRegistry {
    servers: HashMap<ServerId, ServerEntry>,
}

impl InitializerRegistry {
    pub fn new() -> Self {
        Self {
            servers: HashMap::new(),
        }
    }

    /// Install a server's initializer by running its factory
    ///
    /// Re-registering an already-present server warns and succeeds without
    /// re-running the factory. A factory failure leaves the registry
    /// untouched.
    pub fn register(&mut self, handle: ServerHandle, factory: InitializerFactory) -> io::Result<()> {
        if self.servers.contains_key(&handle.id()) {
            warn!(server = %handle.id(), name = handle.name(), "server already registered");
            return Ok(());
        }
        let initializer = factory()?;
        self.servers.insert(
            handle.id(),
            ServerEntry {
                handle,
                initializer,
            },
        );
        Ok(())
    }

    /// Drop a server's entry, running its shutdown hook
    ///
    /// Returns whether the server was present. The caller closes the
    /// server's connections before calling this.
    pub fn unregister(&mut self, id: ServerId) -> bool {
        match self.servers.remove(&id) {
            Some(mut entry) => {
                entry.initializer.on_shutdown();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: ServerId) -> bool {
        self.servers.contains_key(&id)
    }

    /// Borrow a server's initializer
    pub fn initializer_mut(&mut self, id: ServerId) -> Option<&mut (dyn Initializer + '_)> {
        self.servers
            .get_mut(&id)
            .map(|entry| &mut *entry.initializer as &mut dyn Initializer)
    }

    /// Borrow a server's handle
    pub fn handle(&self, id: ServerId) -> Option<&ServerHandle> {
        self.servers.get(&id).map(|entry| &entry.handle)
    }

    /// Deliver an opaque payload to a server's initializer
    pub fn deliver(&mut self, id: ServerId, payload: Payload) -> bool {
        match self.servers.get_mut(&id) {
            Some(entry) => {
                entry.initializer.on_message(payload);
                true
            }
            None => false,
        }
    }

    /// Shut down every initializer; used at worker shutdown
    pub fn shutdown_all(&mut self) {
        for (_, mut entry) in self.servers.drain() {
            entry.initializer.on_shutdown();
        }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}
