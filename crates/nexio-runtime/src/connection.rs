//! Per-socket connection state machine
//!
//! A `Connection` owns a nonblocking TCP stream, its selector interest mask,
//! and its outbound queue. Reads drain into the worker's shared buffer until
//! the socket would block; writes flush the pending queue with partial-write
//! retention. Write interest is armed exactly while the queue is non-empty.

use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use mio::net::TcpStream;
use mio::Interest;

use nexio_core::{ItemId, ServerId};

use crate::command::ConnectionSnapshot;

/// Whether the connection was accepted by a server or initiated by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Client socket awaiting connect completion
    Connecting,

    /// Reading and writing
    Open,

    /// Disconnect requested with bytes still queued; flush, then close
    Closing,

    /// Closed; no further I/O
    Closed,
}

/// Result of one nonblocking read attempt
pub(crate) enum ReadOutcome {
    /// `n` bytes were placed at the start of the shared buffer
    Data(usize),

    /// The socket has nothing more right now
    WouldBlock,

    /// Remote closed the connection (EOF)
    Closed,

    /// Read failed
    Failed(io::Error),
}

/// Result of flushing the outbound queue
pub(crate) enum FlushOutcome {
    /// Queue fully drained
    Flushed,

    /// Bytes remain queued; write interest stays armed
    Partial,

    /// Write failed
    Failed(io::Error),
}

/// One nonblocking socket owned by a worker
pub struct Connection {
    stream: TcpStream,
    id: ItemId,
    role: Role,
    server: Option<ServerId>,
    state: ConnectionState,
    interest: Interest,
    interest_dirty: bool,
    disconnect_requested: bool,
    pending: BytesMut,
    peer_addr: Option<SocketAddr>,
    created: Instant,
    last_read: Instant,
    last_write: Instant,
    bytes_in: u64,
    bytes_out: u64,
    max_idle: Option<Duration>,
}

impl Connection {
    /// Wrap a socket delivered by a server's acceptor; starts in `Open`
    pub(crate) fn accepted(
        id: ItemId,
        stream: TcpStream,
        server: ServerId,
        max_idle: Option<Duration>,
    ) -> Self {
        let now = Instant::now();
        let peer_addr = stream.peer_addr().ok();
        Self {
            stream,
            id,
            role: Role::Server,
            server: Some(server),
            state: ConnectionState::Open,
            interest: Interest::READABLE,
            interest_dirty: false,
            disconnect_requested: false,
            pending: BytesMut::new(),
            peer_addr,
            created: now,
            last_read: now,
            last_write: now,
            bytes_in: 0,
            bytes_out: 0,
            max_idle,
        }
    }

    /// Wrap a client socket with a connect in flight; starts in `Connecting`
    pub(crate) fn connecting(
        id: ItemId,
        stream: TcpStream,
        peer: SocketAddr,
        max_idle: Option<Duration>,
    ) -> Self {
        let now = Instant::now();
        Self {
            stream,
            id,
            role: Role::Client,
            server: None,
            state: ConnectionState::Connecting,
            interest: Interest::WRITABLE,
            interest_dirty: false,
            disconnect_requested: false,
            pending: BytesMut::new(),
            peer_addr: Some(peer),
            created: now,
            last_read: now,
            last_write: now,
            bytes_in: 0,
            bytes_out: 0,
            max_idle,
        }
    }

    #[inline]
    pub fn id(&self) -> ItemId {
        self.id
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn server(&self) -> Option<ServerId> {
        self.server
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    #[inline]
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    #[inline]
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    #[inline]
    pub(crate) fn interest(&self) -> Interest {
        self.interest
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Take the interest-changed flag; the worker reregisters when set
    pub(crate) fn take_interest_change(&mut self) -> Option<Interest> {
        if self.interest_dirty {
            self.interest_dirty = false;
            Some(self.interest)
        } else {
            None
        }
    }

    #[inline]
    pub(crate) fn disconnect_requested(&self) -> bool {
        self.disconnect_requested
    }

    #[inline]
    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// One nonblocking read into the worker's shared buffer
    pub(crate) fn read_step(&mut self, buf: &mut [u8]) -> ReadOutcome {
        if self.state != ConnectionState::Open {
            return ReadOutcome::WouldBlock;
        }
        loop {
            match self.stream.read(buf) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(n) => {
                    self.bytes_in += n as u64;
                    self.last_read = Instant::now();
                    return ReadOutcome::Data(n);
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => return ReadOutcome::WouldBlock,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return ReadOutcome::Failed(e),
            }
        }
    }

    /// Queue outbound bytes and arm write interest
    pub(crate) fn queue_write(&mut self, data: &[u8]) {
        if self.state == ConnectionState::Closed || data.is_empty() {
            return;
        }
        self.pending.extend_from_slice(data);
        self.arm_write_interest();
    }

    fn arm_write_interest(&mut self) {
        let wanted = match self.state {
            ConnectionState::Open => Interest::READABLE | Interest::WRITABLE,
            ConnectionState::Closing => Interest::WRITABLE,
            // Connecting already holds WRITABLE; Closed never writes
            _ => return,
        };
        if self.interest != wanted {
            self.interest = wanted;
            self.interest_dirty = true;
        }
    }

    /// Write queued bytes until drained or the socket would block
    ///
    /// Unwritten bytes remain queued and write interest stays armed. A fully
    /// drained queue in `Closing` promotes the pending disconnect.
    pub(crate) fn flush(&mut self) -> FlushOutcome {
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => break,
                Ok(n) => {
                    self.pending.advance(n);
                    self.bytes_out += n as u64;
                    self.last_write = Instant::now();
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return FlushOutcome::Failed(e),
            }
        }

        if self.pending.is_empty() {
            match self.state {
                ConnectionState::Open => {
                    if self.interest != Interest::READABLE {
                        self.interest = Interest::READABLE;
                        self.interest_dirty = true;
                    }
                }
                ConnectionState::Closing => self.disconnect_requested = true,
                _ => {}
            }
            FlushOutcome::Flushed
        } else {
            FlushOutcome::Partial
        }
    }

    /// Attempt to complete a client connect
    ///
    /// `Ok(true)` means the connection is now open; `Ok(false)` means the
    /// connect is still in flight. A failed connect surfaces the socket
    /// error.
    pub(crate) fn finish_connect(&mut self) -> io::Result<bool> {
        debug_assert_eq!(self.state, ConnectionState::Connecting);
        if let Some(err) = self.stream.take_error()? {
            return Err(err);
        }
        match self.stream.peer_addr() {
            Ok(addr) => {
                self.peer_addr = Some(addr);
                self.state = ConnectionState::Open;
                self.interest = if self.pending.is_empty() {
                    Interest::READABLE
                } else {
                    Interest::READABLE | Interest::WRITABLE
                };
                self.interest_dirty = true;
                Ok(true)
            }
            Err(ref e) if e.kind() == ErrorKind::NotConnected => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Request closure
    ///
    /// With bytes still queued the connection enters `Closing` and closes
    /// once the queue drains; otherwise the worker closes it after the
    /// current callback.
    pub(crate) fn request_disconnect(&mut self) {
        match self.state {
            ConnectionState::Open if !self.pending.is_empty() => {
                self.state = ConnectionState::Closing;
                self.interest = Interest::WRITABLE;
                self.interest_dirty = true;
            }
            ConnectionState::Closed => {}
            _ => self.disconnect_requested = true,
        }
    }

    /// Mark the connection closed; the socket itself closes on drop
    pub(crate) fn mark_closed(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// How long since the last read or write
    pub fn idle_time(&self, now: Instant) -> Duration {
        let last_activity = self.last_read.max(self.last_write);
        now.saturating_duration_since(last_activity)
    }

    /// Idle policy: true once idle time exceeds the connection's ceiling
    pub fn is_timed_out(&self, now: Instant) -> bool {
        match self.max_idle {
            Some(max) => self.idle_time(now) > max,
            None => false,
        }
    }

    /// Point-in-time view for connection summaries
    pub(crate) fn snapshot(&self, now: Instant) -> ConnectionSnapshot {
        ConnectionSnapshot {
            id: self.id,
            peer_addr: self.peer_addr,
            role: self.role,
            bytes_in: self.bytes_in,
            bytes_out: self.bytes_out,
            age: now.saturating_duration_since(self.created),
            idle: self.idle_time(now),
        }
    }
}
