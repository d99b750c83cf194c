//! Command protocol
//!
//! Tagged message types pushed into a worker's mailbox by external callers,
//! plus the notifications workers emit back on reply channels. Each worker
//! pairs an unbounded channel with a selector waker so a send interrupts a
//! blocked poll; commands from a single sender are processed in send order.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use mio::net::TcpStream;
use mio::Waker;
use tracing::warn;

use nexio_core::{ItemId, ServerId, WorkerError, WorkerId, WorkerResult};

use crate::connection::Role;
use crate::handler::{ConnectionHandler, Initializer};
use crate::item::{Context, Payload, WorkerItem};
use crate::servers::ServerHandle;

/// Factory producing a worker item from its freshly allocated context
///
/// Runs inside the owning worker so any state it creates is worker-local.
pub type ItemFactory = Box<dyn FnOnce(Context) -> Box<dyn WorkerItem> + Send>;

/// Factory producing a server's initializer, run inside the worker
pub type InitializerFactory = Box<dyn FnOnce() -> io::Result<Box<dyn Initializer>> + Send>;

/// Continuation scheduled by a handler, run on the owning worker's thread
pub type Callback = Box<dyn FnOnce() + Send>;

/// Commands accepted by the I/O system and routed to a worker
pub enum IoCommand {
    /// Bind a new item on some worker
    BindItem(ItemFactory),

    /// Bind a new client handler and immediately connect it
    BindAndConnect(SocketAddr, ItemFactory),

    /// Bind a new item with a pre-allocated context on its named worker
    BindWithContext(Context, ItemFactory),
}

/// Commands accepted by a single worker's mailbox
pub enum WorkerCommand {
    /// Bind a new item, optionally connecting it once bound
    Bind {
        factory: ItemFactory,
        and_connect: Option<SocketAddr>,
    },

    /// Bind a new item under a pre-allocated context
    BindWithContext {
        context: Context,
        factory: ItemFactory,
    },

    /// Open a client connection for an already-bound handler
    Connect { addr: SocketAddr, id: ItemId },

    /// Unbind an item; closes its connection first if one is active
    UnbindItem { id: ItemId },

    /// Deliver a command later via the external timer
    Schedule {
        delay: Duration,
        command: Box<WorkerCommand>,
    },

    /// Deliver an opaque payload to a bound item
    Message {
        id: ItemId,
        payload: Payload,
        reply: ReplyHandle,
    },

    /// Close a connection gracefully
    Disconnect { id: ItemId },

    /// Close a connection with an error cause
    Kill { id: ItemId, error: io::Error },

    /// Replace a live connection's handler; the new handler carries the
    /// item id of the old one
    SwapHandler { handler: Box<dyn ConnectionHandler> },

    /// Install a server's initializer on this worker
    RegisterServer {
        server: ServerHandle,
        factory: InitializerFactory,
        reply: ReplyHandle,
    },

    /// Tear down a server: close its connections, drop its initializer
    UnregisterServer { id: ServerId },

    /// Ask each of a server's handlers to wind down at its own pace
    ServerShutdownRequest { id: ServerId },

    /// Deliver an opaque payload to a server's initializer
    ServerMessage { id: ServerId, payload: Payload },

    /// Adopt a socket accepted by the server's external acceptor
    NewConnection {
        server: ServerHandle,
        stream: TcpStream,
        attempt: u32,
    },

    /// Run an idle sweep now and acknowledge
    CheckIdleConnections { reply: ReplyHandle },

    /// Snapshot every active connection
    ConnectionSummary { reply: ReplyHandle },

    /// Stop the worker: close all sockets, shut down all initializers
    Shutdown,
}

impl WorkerCommand {
    /// Command name for logging
    pub fn name(&self) -> &'static str {
        match self {
            WorkerCommand::Bind { .. } => "Bind",
            WorkerCommand::BindWithContext { .. } => "BindWithContext",
            WorkerCommand::Connect { .. } => "Connect",
            WorkerCommand::UnbindItem { .. } => "UnbindItem",
            WorkerCommand::Schedule { .. } => "Schedule",
            WorkerCommand::Message { .. } => "Message",
            WorkerCommand::Disconnect { .. } => "Disconnect",
            WorkerCommand::Kill { .. } => "Kill",
            WorkerCommand::SwapHandler { .. } => "SwapHandler",
            WorkerCommand::RegisterServer { .. } => "RegisterServer",
            WorkerCommand::UnregisterServer { .. } => "UnregisterServer",
            WorkerCommand::ServerShutdownRequest { .. } => "ServerShutdownRequest",
            WorkerCommand::ServerMessage { .. } => "ServerMessage",
            WorkerCommand::NewConnection { .. } => "NewConnection",
            WorkerCommand::CheckIdleConnections { .. } => "CheckIdleConnections",
            WorkerCommand::ConnectionSummary { .. } => "ConnectionSummary",
            WorkerCommand::Shutdown => "Shutdown",
        }
    }
}

/// Notifications workers emit on reply channels
pub enum WorkerNotification {
    /// Sent to the parent once the worker's loop is running
    WorkerReady(WorkerRef),

    /// The server's initializer was installed on the replying worker
    ServerRegistered(ServerId),

    /// The server's initializer factory failed; registry untouched
    RegistrationFailed(ServerId),

    /// Acknowledges an explicit `CheckIdleConnections`
    IdleCheckExecuted,

    /// Snapshots of every connection active on the replying worker
    ConnectionSummary(Vec<ConnectionSnapshot>),

    /// The worker could not adopt an accepted socket
    ///
    /// When the socket is handed back (`stream` is `Some`), the acceptor may
    /// retry on another worker; `None` means the socket was closed because a
    /// registered initializer refused the connection.
    ConnectionRefused {
        stream: Option<TcpStream>,
        attempt: u32,
    },

    /// A `Message` addressed an id with no bound item
    MessageDeliveryFailed { id: ItemId, payload: Payload },
}

impl fmt::Debug for WorkerNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerNotification::WorkerReady(w) => write!(f, "WorkerReady({})", w.id()),
            WorkerNotification::ServerRegistered(id) => write!(f, "ServerRegistered({})", id),
            WorkerNotification::RegistrationFailed(id) => write!(f, "RegistrationFailed({})", id),
            WorkerNotification::IdleCheckExecuted => write!(f, "IdleCheckExecuted"),
            WorkerNotification::ConnectionSummary(s) => {
                write!(f, "ConnectionSummary({} connections)", s.len())
            }
            WorkerNotification::ConnectionRefused { stream, attempt } => write!(
                f,
                "ConnectionRefused(attempt {}, socket {})",
                attempt,
                if stream.is_some() { "returned" } else { "closed" }
            ),
            WorkerNotification::MessageDeliveryFailed { id, .. } => {
                write!(f, "MessageDeliveryFailed({})", id)
            }
        }
    }
}

/// Point-in-time view of one active connection
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub id: ItemId,
    pub peer_addr: Option<SocketAddr>,
    pub role: Role,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub age: Duration,
    pub idle: Duration,
}

/// Reply channel handed along with a command
///
/// Delivery is best-effort: a sender that has gone away just drops the
/// notification.
#[derive(Clone)]
pub struct ReplyHandle {
    tx: Sender<WorkerNotification>,
}

impl ReplyHandle {
    pub fn new(tx: Sender<WorkerNotification>) -> Self {
        Self { tx }
    }

    /// Send a notification back to the command's sender
    pub fn send(&self, note: WorkerNotification) {
        let _ = self.tx.send(note);
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ReplyHandle")
    }
}

/// Handle to a worker: its id, mailbox, callback queue, and waker
///
/// Cloneable and shareable; all interaction with a worker from outside its
/// thread goes through this handle.
#[derive(Clone)]
pub struct WorkerRef {
    id: WorkerId,
    commands: Sender<WorkerCommand>,
    callbacks: Sender<Callback>,
    waker: Arc<Waker>,
}

impl WorkerRef {
    pub(crate) fn new(
        id: WorkerId,
        commands: Sender<WorkerCommand>,
        callbacks: Sender<Callback>,
        waker: Arc<Waker>,
    ) -> Self {
        Self {
            id,
            commands,
            callbacks,
            waker,
        }
    }

    /// The worker's id
    #[inline]
    pub fn id(&self) -> WorkerId {
        self.id
    }

    /// Enqueue a command and wake the worker's selector
    pub fn send(&self, command: WorkerCommand) -> WorkerResult<()> {
        self.commands
            .send(command)
            .map_err(|_| WorkerError::MailboxClosed)?;
        if let Err(e) = self.waker.wake() {
            warn!(worker = %self.id, error = %e, "failed to wake worker");
        }
        Ok(())
    }

    /// Enqueue a continuation to run on the worker's thread
    pub fn execute<F>(&self, f: F) -> WorkerResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.callbacks
            .send(Box::new(f))
            .map_err(|_| WorkerError::MailboxClosed)?;
        if let Err(e) = self.waker.wake() {
            warn!(worker = %self.id, error = %e, "failed to wake worker");
        }
        Ok(())
    }
}

impl fmt::Debug for WorkerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerRef").field("id", &self.id).finish()
    }
}
