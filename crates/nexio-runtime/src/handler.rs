//! Connection handlers and server initializers
//!
//! A `ConnectionHandler` is the worker item variant that owns a socket. The
//! worker calls into it with bytes and lifecycle events; the handler pushes
//! outbound bytes back through the `ConnectionCtx` view it is given for the
//! duration of each callback.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use nexio_core::{DisconnectCause, ItemId, LivenessToken};

use crate::buffer::OutputBuffer;
use crate::connection::Connection;
use crate::item::{Context, Payload, WorkerItem};

/// User code driven by a connection's events
///
/// Byte views passed to `on_bytes` are backed by the worker's shared read
/// buffer and are valid only for the duration of the call; handlers that
/// need the data longer must copy it.
pub trait ConnectionHandler: WorkerItem {
    /// The connection finished opening (accept completed or client connect
    /// succeeded)
    fn on_connected(&mut self, conn: &mut ConnectionCtx<'_>) {
        let _ = conn;
    }

    /// Bytes arrived; returning an error closes the connection with
    /// `DisconnectCause::Error`
    fn on_bytes(&mut self, conn: &mut ConnectionCtx<'_>, data: &[u8]) -> io::Result<()>;

    /// The outbound queue drained; the handler may refill the shared output
    /// buffer to keep streaming
    fn on_writable(&mut self, out: &mut OutputBuffer) -> io::Result<()> {
        let _ = out;
        Ok(())
    }

    /// The connection closed; invoked exactly once with the closing cause
    fn on_disconnected(&mut self, cause: DisconnectCause);

    /// A graceful shutdown was requested for the owning server; the handler
    /// chooses when to close. The default disconnects immediately.
    fn shutdown_request(&mut self, conn: &mut ConnectionCtx<'_>) {
        conn.disconnect();
    }

    /// Capability probe: stay bound across error-class disconnects so a
    /// client wrapper can reconnect under the same item id
    fn manual_unbind(&self) -> bool {
        false
    }

    /// Capability probe: a liveness token tying this handler to an external
    /// lifetime; token death closes the connection
    fn liveness(&self) -> Option<LivenessToken> {
        None
    }
}

/// Per-registered-server factory producing handlers on accept
///
/// Constructed inside the worker at registration time, so any state it
/// creates is worker-local.
pub trait Initializer: Send {
    /// Produce a handler for a newly adopted socket
    ///
    /// An error refuses the connection: the socket is closed and the server
    /// is notified.
    fn on_connect(&mut self, ctx: Context) -> io::Result<Box<dyn ConnectionHandler>>;

    /// The server was unregistered or the worker is stopping
    fn on_shutdown(&mut self) {}

    /// Deliver an opaque payload addressed to the server
    fn on_message(&mut self, payload: Payload) {
        let _ = payload;
    }
}

/// Borrowed view of a connection, valid for one handler callback
///
/// Writes are queued on the connection and flushed by the worker on the
/// next writable tick; a disconnect request is honored once the callback
/// returns.
pub struct ConnectionCtx<'a> {
    conn: &'a mut Connection,
}

impl<'a> ConnectionCtx<'a> {
    pub(crate) fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// The connection's item id
    #[inline]
    pub fn id(&self) -> ItemId {
        self.conn.id()
    }

    /// Remote address, once known
    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.conn.peer_addr()
    }

    /// Queue outbound bytes and arm write interest
    pub fn write(&mut self, data: &[u8]) {
        self.conn.queue_write(data);
    }

    /// Request closure; performed by the worker after the callback returns
    pub fn disconnect(&mut self) {
        self.conn.request_disconnect();
    }

    /// Total bytes received on this connection
    #[inline]
    pub fn bytes_in(&self) -> u64 {
        self.conn.bytes_in()
    }

    /// Total bytes sent on this connection
    #[inline]
    pub fn bytes_out(&self) -> u64 {
        self.conn.bytes_out()
    }

    /// How long the connection has been idle
    pub fn idle_time(&self) -> Duration {
        self.conn.idle_time(std::time::Instant::now())
    }
}
