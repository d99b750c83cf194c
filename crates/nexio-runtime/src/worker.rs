//! Worker event loop
//!
//! A worker is a single-threaded dispatcher that owns its selector, its
//! registries, and every connection bound to it. One loop iteration: a
//! bounded selector poll, readiness processing per key (connect, then read,
//! then write), a batched mailbox drain, the callback queue, a scan of
//! watched handlers, and — when the period has elapsed — the idle sweep.
//!
//! NOT thread-safe by design: all state is mutated on the owning thread, and
//! external callers interact only through the `WorkerRef` mailbox.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::TcpStream;
use mio::{Interest, Token};
use tracing::{debug, error, info, trace, warn};

use nexio_core::{DisconnectCause, ItemId, ServerId, WorkerError, WorkerId, WorkerResult};

use crate::buffer::OutputBuffer;
use crate::command::{
    Callback, ConnectionSnapshot, InitializerFactory, ItemFactory, ReplyHandle, WorkerCommand,
    WorkerNotification, WorkerRef,
};
use crate::config::IoConfig;
use crate::connection::{Connection, ConnectionState, FlushOutcome, ReadOutcome, Role};
use crate::handler::{ConnectionCtx, ConnectionHandler};
use crate::item::{Context, Payload};
use crate::registry::ItemRegistry;
use crate::selector::{Ready, Selector};
use crate::servers::{InitializerRegistry, ServerHandle};
use crate::timer::TimerRef;
use crate::watch::WatchTable;

/// Token reserved for the mailbox waker
const WAKER: Token = Token(usize::MAX);

/// Selector event buffer capacity
const EVENTS_CAPACITY: usize = 1024;

#[inline]
fn token_of(id: ItemId) -> Token {
    Token(id.as_usize())
}

/// Single-threaded event-loop owner of a set of connections
pub struct Worker {
    id: WorkerId,
    config: IoConfig,
    selector: Selector,
    ready: Vec<Ready>,
    mailbox: Receiver<WorkerCommand>,
    callbacks: Receiver<Callback>,
    handle: WorkerRef,
    parent: Sender<WorkerNotification>,
    ids: Arc<AtomicU64>,
    timer: TimerRef,
    items: ItemRegistry,
    connections: HashMap<ItemId, Connection>,
    servers: InitializerRegistry,
    watched: WatchTable,
    read_buf: Box<[u8]>,
    out_buf: OutputBuffer,
    last_idle_sweep: Instant,
    running: bool,
}

impl Worker {
    /// Build a worker and the handle external callers use to reach it
    pub fn new(
        id: WorkerId,
        config: IoConfig,
        ids: Arc<AtomicU64>,
        timer: TimerRef,
        parent: Sender<WorkerNotification>,
    ) -> io::Result<(Worker, WorkerRef)> {
        let selector = Selector::new(EVENTS_CAPACITY)?;
        let waker = Arc::new(selector.waker(WAKER)?);
        let (command_tx, command_rx) = unbounded();
        let (callback_tx, callback_rx) = unbounded();
        let handle = WorkerRef::new(id, command_tx, callback_tx, waker);

        let worker = Worker {
            id,
            selector,
            ready: Vec::with_capacity(EVENTS_CAPACITY),
            mailbox: command_rx,
            callbacks: callback_rx,
            handle: handle.clone(),
            parent,
            ids,
            timer,
            items: ItemRegistry::new(),
            connections: HashMap::new(),
            servers: InitializerRegistry::new(),
            watched: WatchTable::new(),
            read_buf: vec![0u8; config.read_buffer_size].into_boxed_slice(),
            out_buf: OutputBuffer::with_max(config.output_buffer_size),
            last_idle_sweep: Instant::now(),
            running: true,
            config,
        };
        Ok((worker, handle))
    }

    /// The worker's id
    pub fn worker_id(&self) -> WorkerId {
        self.id
    }

    /// Run until a `Shutdown` command arrives. Blocks the current thread.
    pub fn run(mut self) {
        info!(worker = %self.id, "worker started");
        let _ = self
            .parent
            .send(WorkerNotification::WorkerReady(self.handle.clone()));

        while self.running {
            if let Err(e) = self.step() {
                error!(worker = %self.id, error = %e, "selector failure, stopping worker");
                break;
            }
        }
        self.run_shutdown();
    }

    /// One loop iteration
    pub fn step(&mut self) -> io::Result<()> {
        let mut ready = std::mem::take(&mut self.ready);
        self.selector.poll(self.config.select_timeout, &mut ready)?;
        for event in &ready {
            self.process_ready(*event);
        }
        self.ready = ready;

        for _ in 0..self.config.mailbox_batch {
            match self.mailbox.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(_) => break,
            }
        }

        while let Ok(callback) = self.callbacks.try_recv() {
            callback();
        }

        for id in self.watched.scan() {
            info!(worker = %self.id, %id, "watched handler died");
            self.unregister_connection(id, DisconnectCause::Disconnect);
        }

        if self.last_idle_sweep.elapsed() >= self.config.idle_check_frequency {
            self.run_idle_sweep();
        }
        Ok(())
    }

    // ── Readiness processing ─────────────────────────────────────────

    fn process_ready(&mut self, event: Ready) {
        if event.token == WAKER {
            return;
        }
        let id = ItemId::new(event.token.0 as u64);
        if !self.connections.contains_key(&id) {
            debug!(worker = %self.id, %id, "readiness for unknown key, skipping");
            return;
        }

        // connect completes before any read/write on the same key
        let connecting = self
            .connections
            .get(&id)
            .map(|c| c.state() == ConnectionState::Connecting)
            .unwrap_or(false);
        if connecting {
            if !event.writable {
                return;
            }
            self.try_finish_connect(id);
            let open = self
                .connections
                .get(&id)
                .map(|c| c.state() == ConnectionState::Open)
                .unwrap_or(false);
            if !open {
                return;
            }
        }

        if event.readable && !self.handle_readable(id) {
            return;
        }

        if event.writable {
            let writable_state = self
                .connections
                .get(&id)
                .map(|c| {
                    matches!(
                        c.state(),
                        ConnectionState::Open | ConnectionState::Closing
                    )
                })
                .unwrap_or(false);
            if writable_state && !self.handle_writable(id) {
                return;
            }
        }

        self.finish_event(id);
    }

    /// Drive a pending client connect forward
    fn try_finish_connect(&mut self, id: ItemId) {
        let result = match self.connections.get_mut(&id) {
            Some(conn) => conn.finish_connect(),
            None => return,
        };
        match result {
            Ok(true) => {
                info!(worker = %self.id, %id, "connection established");
                self.apply_interest(id);
                if self.invoke_connected(id) {
                    self.finish_event(id);
                }
            }
            Ok(false) => {}
            Err(e) => {
                info!(worker = %self.id, %id, error = %e, "connect failed");
                self.unregister_connection(id, DisconnectCause::ConnectFailed(e));
            }
        }
    }

    /// Read until the socket would block, delivering each chunk to the
    /// handler. Returns false once the connection has been unregistered.
    fn handle_readable(&mut self, id: ItemId) -> bool {
        loop {
            let outcome = {
                let Some(conn) = self.connections.get_mut(&id) else {
                    return false;
                };
                if conn.disconnect_requested() {
                    return true;
                }
                conn.read_step(&mut self.read_buf)
            };

            match outcome {
                ReadOutcome::WouldBlock => return true,
                ReadOutcome::Closed => {
                    self.unregister_connection(id, DisconnectCause::Closed);
                    return false;
                }
                ReadOutcome::Failed(e) => {
                    debug!(worker = %self.id, %id, error = %e, "read failed");
                    self.unregister_connection(id, DisconnectCause::Closed);
                    return false;
                }
                ReadOutcome::Data(n) => {
                    // handler sees a view into the shared buffer, valid only
                    // for this call
                    let delivered = {
                        let Some(conn) = self.connections.get_mut(&id) else {
                            return false;
                        };
                        match self.items.get_mut(id).and_then(|item| item.as_handler()) {
                            Some(handler) => {
                                let mut ctx = ConnectionCtx::new(conn);
                                Some(handler.on_bytes(&mut ctx, &self.read_buf[..n]))
                            }
                            None => None,
                        }
                    };
                    match delivered {
                        Some(Ok(())) => {}
                        Some(Err(e)) => {
                            self.unregister_connection(id, DisconnectCause::Error(e));
                            return false;
                        }
                        None => {
                            error!(worker = %self.id, %id, "bytes for connection without handler");
                            self.unregister_connection(id, DisconnectCause::Unhandled);
                            return false;
                        }
                    }
                }
            }
        }
    }

    /// Flush the outbound queue; once drained, let the handler refill the
    /// shared output buffer. Returns false once the connection has been
    /// unregistered.
    fn handle_writable(&mut self, id: ItemId) -> bool {
        let outcome = match self.connections.get_mut(&id) {
            Some(conn) => conn.flush(),
            None => return false,
        };
        if let FlushOutcome::Failed(e) = outcome {
            self.unregister_connection(id, DisconnectCause::Error(e));
            return false;
        }

        let want_refill = self
            .connections
            .get(&id)
            .map(|c| {
                c.state() == ConnectionState::Open
                    && !c.has_pending()
                    && !c.disconnect_requested()
            })
            .unwrap_or(false);
        if !want_refill {
            return true;
        }

        self.out_buf.clear();
        let refill = match self.items.get_mut(id).and_then(|item| item.as_handler()) {
            Some(handler) => handler.on_writable(&mut self.out_buf),
            None => Ok(()),
        };
        if let Err(e) = refill {
            self.unregister_connection(id, DisconnectCause::Error(e));
            return false;
        }
        if self.out_buf.is_empty() {
            return true;
        }

        let data = self.out_buf.take();
        let outcome = match self.connections.get_mut(&id) {
            Some(conn) => {
                conn.queue_write(&data);
                conn.flush()
            }
            None => return false,
        };
        if let FlushOutcome::Failed(e) = outcome {
            self.unregister_connection(id, DisconnectCause::Error(e));
            return false;
        }
        true
    }

    /// Post-callback bookkeeping for one key: honor a requested disconnect,
    /// otherwise sync the interest mask with the selector
    fn finish_event(&mut self, id: ItemId) {
        let requested = self
            .connections
            .get(&id)
            .map(|c| c.disconnect_requested())
            .unwrap_or(false);
        if requested {
            self.unregister_connection(id, DisconnectCause::Disconnect);
            return;
        }
        self.apply_interest(id);
    }

    fn apply_interest(&mut self, id: ItemId) {
        if let Some(conn) = self.connections.get_mut(&id) {
            if let Some(interest) = conn.take_interest_change() {
                let token = token_of(id);
                if let Err(e) = self.selector.reregister(conn.stream_mut(), token, interest) {
                    warn!(worker = %self.id, %id, error = %e, "failed to update interest");
                }
            }
        }
    }

    fn invoke_connected(&mut self, id: ItemId) -> bool {
        let delivered = {
            let Some(conn) = self.connections.get_mut(&id) else {
                return false;
            };
            match self.items.get_mut(id).and_then(|item| item.as_handler()) {
                Some(handler) => {
                    let mut ctx = ConnectionCtx::new(conn);
                    handler.on_connected(&mut ctx);
                    true
                }
                None => false,
            }
        };
        if !delivered {
            error!(worker = %self.id, %id, "connection has no handler");
            self.unregister_connection(id, DisconnectCause::Unhandled);
        }
        delivered
    }

    // ── Command processing ───────────────────────────────────────────

    fn handle_command(&mut self, command: WorkerCommand) {
        trace!(worker = %self.id, command = command.name(), "processing command");
        match command {
            WorkerCommand::Bind {
                factory,
                and_connect,
            } => {
                let id = self.next_item_id();
                let context = Context::new(id, self.handle.clone());
                self.bind_new(context, factory, and_connect);
            }
            WorkerCommand::BindWithContext { context, factory } => {
                if context.worker_id() != self.id {
                    error!(
                        worker = %self.id,
                        target = %context.worker_id(),
                        "context addressed to another worker"
                    );
                    return;
                }
                self.bind_new(context, factory, None);
            }
            WorkerCommand::Connect { addr, id } => {
                if let Err(e) = self.client_connect(addr, id) {
                    error!(worker = %self.id, %id, error = %e, "connect aborted");
                }
            }
            WorkerCommand::UnbindItem { id } => {
                if self.connections.contains_key(&id) {
                    self.unregister_connection(id, DisconnectCause::Disconnect);
                } else if self.items.contains(id) {
                    let _ = self.items.unbind(id);
                } else {
                    warn!(worker = %self.id, %id, "unbind for unknown item");
                }
            }
            WorkerCommand::Schedule { delay, command } => {
                // the loop blocks in the selector, so delays are kept by the
                // external timer
                self.timer.schedule(delay, self.handle.clone(), *command);
            }
            WorkerCommand::Message { id, payload, reply } => {
                self.deliver_message(id, payload, reply)
            }
            WorkerCommand::Disconnect { id } => {
                if self.connections.contains_key(&id) {
                    self.unregister_connection(id, DisconnectCause::Disconnect);
                } else {
                    debug!(worker = %self.id, %id, "disconnect for unknown connection");
                }
            }
            WorkerCommand::Kill { id, error } => {
                if self.connections.contains_key(&id) {
                    self.unregister_connection(id, DisconnectCause::Error(error));
                } else {
                    debug!(worker = %self.id, %id, "kill for unknown connection");
                }
            }
            WorkerCommand::SwapHandler { handler } => self.swap_handler(handler),
            WorkerCommand::RegisterServer {
                server,
                factory,
                reply,
            } => self.register_server(server, factory, reply),
            WorkerCommand::UnregisterServer { id } => self.unregister_server(id),
            WorkerCommand::ServerShutdownRequest { id } => self.server_shutdown_request(id),
            WorkerCommand::ServerMessage { id, payload } => {
                if !self.servers.deliver(id, payload) {
                    warn!(worker = %self.id, server = %id, "message for unregistered server");
                }
            }
            WorkerCommand::NewConnection {
                server,
                stream,
                attempt,
            } => self.adopt_connection(server, stream, attempt),
            WorkerCommand::CheckIdleConnections { reply } => {
                self.run_idle_sweep();
                reply.send(WorkerNotification::IdleCheckExecuted);
            }
            WorkerCommand::ConnectionSummary { reply } => {
                reply.send(WorkerNotification::ConnectionSummary(self.summary()));
            }
            WorkerCommand::Shutdown => {
                info!(worker = %self.id, "shutdown requested");
                self.running = false;
            }
        }
    }

    fn next_item_id(&self) -> ItemId {
        ItemId::new(self.ids.fetch_add(1, Ordering::Relaxed))
    }

    fn bind_new(&mut self, context: Context, factory: ItemFactory, and_connect: Option<SocketAddr>) {
        let item = factory(context);
        let id = item.id();
        if let Err(e) = self.items.bind(item) {
            error!(worker = %self.id, %id, error = %e, "bind failed");
            return;
        }
        trace!(worker = %self.id, %id, "item bound");
        if let Some(addr) = and_connect {
            if let Err(e) = self.client_connect(addr, id) {
                error!(worker = %self.id, %id, error = %e, "connect aborted");
            }
        }
    }

    // ── Client connect ───────────────────────────────────────────────

    /// Open a client connection for a bound handler
    ///
    /// Aborts with an error when the item is missing or cannot own a
    /// connection; later failures reach the handler as `ConnectFailed`.
    fn client_connect(&mut self, addr: SocketAddr, id: ItemId) -> WorkerResult<()> {
        {
            let Some(item) = self.items.get_mut(id) else {
                return Err(WorkerError::UnknownItem(id));
            };
            if item.as_handler().is_none() {
                return Err(WorkerError::NotAHandler(id));
            }
        }

        match TcpStream::connect(addr) {
            Ok(mut stream) => {
                let token = token_of(id);
                if let Err(e) = self.selector.register(&mut stream, token, Interest::WRITABLE) {
                    error!(worker = %self.id, %id, error = %e, "failed to register client socket");
                    self.fail_connect(id, e);
                    return Ok(());
                }
                let conn =
                    Connection::connecting(id, stream, addr, self.config.max_idle_time);
                self.connections.insert(id, conn);

                let liveness = self
                    .items
                    .get_mut(id)
                    .and_then(|item| item.as_handler())
                    .and_then(|h| h.liveness());
                if let Some(token) = liveness {
                    self.watched.watch(id, token);
                }

                info!(worker = %self.id, %id, peer = %addr, "initiating connection");
                // loopback connects can complete before the first poll
                self.try_finish_connect(id);
            }
            Err(e) => {
                info!(worker = %self.id, %id, peer = %addr, error = %e, "connect failed synchronously");
                self.fail_connect(id, e);
            }
        }
        Ok(())
    }

    /// Connect failure before a connection existed: deliver the cause and
    /// apply the client unbind policy
    fn fail_connect(&mut self, id: ItemId, error: io::Error) {
        let manual = self
            .items
            .get_mut(id)
            .and_then(|item| item.as_handler())
            .map(|h| h.manual_unbind())
            .unwrap_or(false);
        if let Some(handler) = self.items.get_mut(id).and_then(|item| item.as_handler()) {
            handler.on_disconnected(DisconnectCause::ConnectFailed(error));
        }
        if manual {
            debug!(worker = %self.id, %id, "manual-unbind handler kept bound for reconnect");
        } else if self.items.contains(id) {
            let _ = self.items.unbind(id);
        }
    }

    // ── Handler swap ─────────────────────────────────────────────────

    fn swap_handler(&mut self, handler: Box<dyn ConnectionHandler>) {
        let id = handler.id();
        if !self.connections.contains_key(&id) {
            error!(worker = %self.id, %id, "handler swap for unknown connection");
            return;
        }
        let liveness = handler.liveness();
        let item: Box<dyn crate::item::WorkerItem> = handler;
        if self.items.replace(item) {
            // the connection resolves its handler through the registry, so
            // the swap is complete once the registry entry changes
            self.watched.unwatch(id);
            if let Some(token) = liveness {
                self.watched.watch(id, token);
            }
            debug!(worker = %self.id, %id, "handler swapped");
        } else {
            error!(worker = %self.id, %id, "handler swap without existing item");
        }
    }

    // ── Server lifecycle ─────────────────────────────────────────────

    fn register_server(
        &mut self,
        server: ServerHandle,
        factory: InitializerFactory,
        reply: ReplyHandle,
    ) {
        let id = server.id();
        let name = server.name().to_owned();
        match self.servers.register(server, factory) {
            Ok(()) => {
                info!(worker = %self.id, server = %id, name = %name, "server registered");
                reply.send(WorkerNotification::ServerRegistered(id));
            }
            Err(e) => {
                error!(worker = %self.id, server = %id, name = %name, error = %e, "initializer construction failed");
                reply.send(WorkerNotification::RegistrationFailed(id));
            }
        }
    }

    fn unregister_server(&mut self, id: ServerId) {
        let owned: Vec<ItemId> = self
            .connections
            .values()
            .filter(|c| c.server() == Some(id))
            .map(|c| c.id())
            .collect();
        for conn_id in owned {
            self.unregister_connection(conn_id, DisconnectCause::Terminated);
        }
        if self.servers.unregister(id) {
            info!(worker = %self.id, server = %id, "server unregistered");
        } else {
            warn!(worker = %self.id, server = %id, "unregister for unknown server");
        }
    }

    /// Ask each of the server's handlers to wind down; no forced teardown
    fn server_shutdown_request(&mut self, id: ServerId) {
        let owned: Vec<ItemId> = self
            .connections
            .values()
            .filter(|c| c.server() == Some(id))
            .map(|c| c.id())
            .collect();
        for conn_id in owned {
            let delivered = {
                let Some(conn) = self.connections.get_mut(&conn_id) else {
                    continue;
                };
                match self.items.get_mut(conn_id).and_then(|item| item.as_handler()) {
                    Some(handler) => {
                        let mut ctx = ConnectionCtx::new(conn);
                        handler.shutdown_request(&mut ctx);
                        true
                    }
                    None => false,
                }
            };
            if delivered {
                self.finish_event(conn_id);
            }
        }
    }

    /// Adopt a socket delivered by a server's external acceptor
    fn adopt_connection(&mut self, server: ServerHandle, mut stream: TcpStream, attempt: u32) {
        if !self.servers.contains(server.id()) {
            // hand the socket back; the acceptor may retry on another worker
            warn!(worker = %self.id, server = %server.id(), attempt, "accept onto unregistered server refused");
            server.notify(WorkerNotification::ConnectionRefused {
                stream: Some(stream),
                attempt,
            });
            return;
        }

        let id = self.next_item_id();
        let context = Context::new(id, self.handle.clone());
        let produced = match self.servers.initializer_mut(server.id()) {
            Some(initializer) => initializer.on_connect(context),
            None => return,
        };
        let handler = match produced {
            Ok(handler) => handler,
            Err(e) => {
                warn!(worker = %self.id, server = %server.id(), error = %e, attempt, "initializer refused connection");
                server.notify(WorkerNotification::ConnectionRefused {
                    stream: None,
                    attempt,
                });
                return;
            }
        };

        let token = token_of(id);
        if let Err(e) = self.selector.register(&mut stream, token, Interest::READABLE) {
            error!(worker = %self.id, %id, error = %e, "failed to register accepted socket");
            server.notify(WorkerNotification::ConnectionRefused {
                stream: None,
                attempt,
            });
            return;
        }

        let liveness = handler.liveness();
        let item: Box<dyn crate::item::WorkerItem> = handler;
        if let Err(e) = self.items.bind(item) {
            error!(worker = %self.id, %id, error = %e, "bind of accepted handler failed");
            let _ = self.selector.deregister(&mut stream);
            server.notify(WorkerNotification::ConnectionRefused {
                stream: None,
                attempt,
            });
            return;
        }

        let conn = Connection::accepted(id, stream, server.id(), self.config.max_idle_time);
        self.connections.insert(id, conn);
        if let Some(token) = liveness {
            self.watched.watch(id, token);
        }
        info!(worker = %self.id, %id, server = server.name(), "connection accepted");
        if self.invoke_connected(id) {
            self.finish_event(id);
        }
    }

    // ── Message delivery ─────────────────────────────────────────────

    fn deliver_message(&mut self, id: ItemId, payload: Payload, reply: ReplyHandle) {
        match self.items.get_mut(id) {
            Some(item) => item.on_message(payload, &reply),
            None => {
                warn!(worker = %self.id, %id, "undeliverable message");
                reply.send(WorkerNotification::MessageDeliveryFailed { id, payload });
            }
        }
    }

    // ── Disconnect / unregister ──────────────────────────────────────

    /// Strict unregister sequence: remove from the active map, cancel the
    /// key, deliver `on_disconnected` exactly once, then apply the unbind
    /// policy (client + manual-unbind + error cause stays bound).
    fn unregister_connection(&mut self, id: ItemId, cause: DisconnectCause) {
        let Some(mut conn) = self.connections.remove(&id) else {
            debug!(worker = %self.id, %id, "unregister for unknown connection");
            return;
        };
        if let Err(e) = self.selector.deregister(conn.stream_mut()) {
            debug!(worker = %self.id, %id, error = %e, "deregister failed");
        }
        conn.mark_closed();
        self.watched.unwatch(id);

        let role = conn.role();
        let is_error = cause.is_error();
        info!(worker = %self.id, %id, %cause, active = self.connections.len(), "connection unregistered");

        let manual = self
            .items
            .get_mut(id)
            .and_then(|item| item.as_handler())
            .map(|h| h.manual_unbind())
            .unwrap_or(false);
        match self.items.get_mut(id).and_then(|item| item.as_handler()) {
            Some(handler) => handler.on_disconnected(cause),
            None => debug!(worker = %self.id, %id, "closed connection had no handler"),
        }

        let keep_bound = role == Role::Client && manual && is_error;
        if keep_bound {
            debug!(worker = %self.id, %id, "manual-unbind handler kept bound for reconnect");
        } else if self.items.contains(id) {
            let _ = self.items.unbind(id);
        }
        // socket closes when conn drops
    }

    // ── Idle sweep and summaries ─────────────────────────────────────

    fn run_idle_sweep(&mut self) {
        let period = self.config.idle_check_frequency;
        self.items.idle_check(period);

        let now = Instant::now();
        let timed_out: Vec<ItemId> = self
            .connections
            .values()
            .filter(|c| c.is_timed_out(now))
            .map(|c| c.id())
            .collect();
        for id in timed_out {
            info!(worker = %self.id, %id, "idle timeout");
            self.unregister_connection(id, DisconnectCause::TimedOut);
        }
        self.last_idle_sweep = now;
    }

    fn summary(&self) -> Vec<ConnectionSnapshot> {
        let now = Instant::now();
        self.connections.values().map(|c| c.snapshot(now)).collect()
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Close every active socket and shut down every initializer
    fn run_shutdown(&mut self) {
        let ids: Vec<ItemId> = self.connections.keys().copied().collect();
        for id in ids {
            self.unregister_connection(id, DisconnectCause::Terminated);
        }
        self.servers.shutdown_all();
        self.items.clear();
        info!(worker = %self.id, "worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crossbeam_channel::{unbounded, Receiver};

    use nexio_core::{liveness, LivenessToken};

    use crate::handler::Initializer;
    use crate::item::WorkerItem;
    use crate::timer::TimerThread;

    #[derive(Debug, PartialEq, Clone)]
    enum Event {
        Bound,
        Unbound,
        Connected,
        Bytes(Vec<u8>),
        Disconnected(&'static str),
        Message(u32),
        ShutdownRequest,
    }

    type EventLog = Arc<Mutex<Vec<Event>>>;

    fn new_log() -> EventLog {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn cause_name(cause: &DisconnectCause) -> &'static str {
        match cause {
            DisconnectCause::Disconnect => "disconnect",
            DisconnectCause::Closed => "closed",
            DisconnectCause::TimedOut => "timed_out",
            DisconnectCause::Terminated => "terminated",
            DisconnectCause::Unhandled => "unhandled",
            DisconnectCause::ConnectFailed(_) => "connect_failed",
            DisconnectCause::Error(_) => "error",
        }
    }

    fn has_event(log: &EventLog, event: &Event) -> bool {
        log.lock().unwrap().iter().any(|e| e == event)
    }

    fn count_disconnects(log: &EventLog) -> usize {
        log.lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Disconnected(_)))
            .count()
    }

    struct TestHandler {
        context: Context,
        log: EventLog,
        echo: bool,
        manual_unbind: bool,
        liveness: Option<LivenessToken>,
    }

    impl TestHandler {
        fn new(context: Context, log: EventLog) -> Self {
            Self {
                context,
                log,
                echo: false,
                manual_unbind: false,
                liveness: None,
            }
        }
    }

    impl WorkerItem for TestHandler {
        fn context(&self) -> &Context {
            &self.context
        }

        fn on_bind(&mut self) {
            self.log.lock().unwrap().push(Event::Bound);
        }

        fn on_unbind(&mut self) {
            self.log.lock().unwrap().push(Event::Unbound);
        }

        fn on_message(&mut self, payload: Payload, _reply: &ReplyHandle) {
            if let Ok(n) = payload.downcast::<u32>() {
                self.log.lock().unwrap().push(Event::Message(*n));
            }
        }

        fn as_handler(&mut self) -> Option<&mut dyn ConnectionHandler> {
            Some(self)
        }
    }

    impl ConnectionHandler for TestHandler {
        fn on_connected(&mut self, _conn: &mut ConnectionCtx<'_>) {
            self.log.lock().unwrap().push(Event::Connected);
        }

        fn on_bytes(&mut self, conn: &mut ConnectionCtx<'_>, data: &[u8]) -> io::Result<()> {
            self.log.lock().unwrap().push(Event::Bytes(data.to_vec()));
            if self.echo {
                conn.write(data);
            }
            Ok(())
        }

        fn on_disconnected(&mut self, cause: DisconnectCause) {
            self.log
                .lock()
                .unwrap()
                .push(Event::Disconnected(cause_name(&cause)));
        }

        fn shutdown_request(&mut self, conn: &mut ConnectionCtx<'_>) {
            self.log.lock().unwrap().push(Event::ShutdownRequest);
            conn.disconnect();
        }

        fn manual_unbind(&self) -> bool {
            self.manual_unbind
        }

        fn liveness(&self) -> Option<LivenessToken> {
            self.liveness.clone()
        }
    }

    struct TestInitializer {
        logs: Arc<Mutex<Vec<EventLog>>>,
        shutdowns: Arc<AtomicUsize>,
        liveness: Option<LivenessToken>,
    }

    impl Initializer for TestInitializer {
        fn on_connect(&mut self, ctx: Context) -> io::Result<Box<dyn ConnectionHandler>> {
            let log = new_log();
            self.logs.lock().unwrap().push(Arc::clone(&log));
            let mut handler = TestHandler::new(ctx, log);
            handler.echo = true;
            handler.liveness = self.liveness.clone();
            Ok(Box::new(handler))
        }

        fn on_shutdown(&mut self) {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestRig {
        worker: Worker,
        wref: WorkerRef,
        ids: Arc<AtomicU64>,
        _timer: TimerThread,
        _parent_rx: Receiver<WorkerNotification>,
    }

    fn rig(config: IoConfig) -> TestRig {
        let timer = TimerThread::start().unwrap();
        let ids = Arc::new(AtomicU64::new(1));
        let (parent_tx, parent_rx) = unbounded();
        let (worker, wref) = Worker::new(
            WorkerId::new(0),
            config,
            Arc::clone(&ids),
            timer.handle(),
            parent_tx,
        )
        .unwrap();
        TestRig {
            worker,
            wref,
            ids,
            _timer: timer,
            _parent_rx: parent_rx,
        }
    }

    fn step_until<F: FnMut() -> bool>(worker: &mut Worker, mut cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            worker.step().unwrap();
        }
    }

    fn next_id(rig: &TestRig) -> ItemId {
        ItemId::new(rig.ids.fetch_add(1, Ordering::Relaxed))
    }

    /// Bind a handler built by the test under a known id
    fn bind_handler(
        rig: &mut TestRig,
        log: &EventLog,
        configure: impl FnOnce(&mut TestHandler) + Send + 'static,
    ) -> ItemId {
        let id = next_id(rig);
        let context = Context::new(id, rig.wref.clone());
        let log = Arc::clone(log);
        rig.wref
            .send(WorkerCommand::BindWithContext {
                context,
                factory: Box::new(move |ctx| {
                    let mut handler = TestHandler::new(ctx, log);
                    configure(&mut handler);
                    Box::new(handler) as Box<dyn WorkerItem>
                }),
            })
            .unwrap();
        rig.worker.step().unwrap();
        id
    }

    fn register_server(
        rig: &mut TestRig,
        liveness: Option<LivenessToken>,
    ) -> (
        ServerHandle,
        Receiver<WorkerNotification>,
        Arc<Mutex<Vec<EventLog>>>,
        Arc<AtomicUsize>,
    ) {
        let (tx, rx) = unbounded();
        let handle = ServerHandle::new(ServerId::new(1), "test-server", tx.clone());
        let logs = Arc::new(Mutex::new(Vec::new()));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let (factory_logs, factory_shutdowns) = (Arc::clone(&logs), Arc::clone(&shutdowns));
        rig.wref
            .send(WorkerCommand::RegisterServer {
                server: handle.clone(),
                factory: Box::new(move || {
                    Ok(Box::new(TestInitializer {
                        logs: factory_logs,
                        shutdowns: factory_shutdowns,
                        liveness,
                    }) as Box<dyn Initializer>)
                }),
                reply: ReplyHandle::new(tx),
            })
            .unwrap();
        rig.worker.step().unwrap();
        (handle, rx, logs, shutdowns)
    }

    /// Hand an accepted loopback socket to the worker; returns the client end
    fn accept_into(rig: &TestRig, server: &ServerHandle) -> std::net::TcpStream {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let client = std::net::TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();
        let stream = TcpStream::from_std(accepted);
        rig.wref
            .send(WorkerCommand::NewConnection {
                server: server.clone(),
                stream,
                attempt: 1,
            })
            .unwrap();
        client
    }

    fn fast_config() -> IoConfig {
        IoConfig::new().num_workers(1)
    }

    #[test]
    fn test_accept_and_echo() {
        let mut rig = rig(fast_config());
        let (server, server_rx, logs, _) = register_server(&mut rig, None);
        assert!(matches!(
            server_rx.try_recv().unwrap(),
            WorkerNotification::ServerRegistered(_)
        ));

        let mut client = accept_into(&rig, &server);
        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);
        step_until(&mut rig.worker, || has_event(&log, &Event::Connected));

        client.write_all(b"ping").unwrap();
        client.set_nonblocking(true).unwrap();

        let mut echoed = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut buf = [0u8; 16];
        while echoed.len() < 4 {
            assert!(Instant::now() < deadline, "echo did not arrive");
            rig.worker.step().unwrap();
            match client.read(&mut buf) {
                Ok(0) => panic!("unexpected close"),
                Ok(n) => echoed.extend_from_slice(&buf[..n]),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => panic!("client read failed: {}", e),
            }
        }
        assert_eq!(echoed, b"ping");
        assert!(has_event(&log, &Event::Bytes(b"ping".to_vec())));
    }

    #[test]
    fn test_idle_timeout_closes_exactly_once() {
        let config = fast_config()
            .idle_check_frequency(Duration::from_millis(20))
            .max_idle_time(Some(Duration::from_millis(50)));
        let mut rig = rig(config);
        let (server, _server_rx, logs, _) = register_server(&mut rig, None);
        let _client = accept_into(&rig, &server);

        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);

        step_until(&mut rig.worker, || {
            has_event(&log, &Event::Disconnected("timed_out"))
        });
        // extra iterations must not produce a second disconnect
        for _ in 0..30 {
            rig.worker.step().unwrap();
        }
        assert_eq!(count_disconnects(&log), 1);

        // the summary no longer lists the connection
        let (tx, rx) = unbounded();
        rig.wref
            .send(WorkerCommand::ConnectionSummary {
                reply: ReplyHandle::new(tx),
            })
            .unwrap();
        rig.worker.step().unwrap();
        match rx.try_recv().unwrap() {
            WorkerNotification::ConnectionSummary(snapshots) => assert!(snapshots.is_empty()),
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[test]
    fn test_infinite_idle_never_sweeps() {
        let config = fast_config()
            .idle_check_frequency(Duration::from_millis(10))
            .max_idle_time(None);
        let mut rig = rig(config);
        let (server, _server_rx, logs, _) = register_server(&mut rig, None);
        let _client = accept_into(&rig, &server);
        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);

        let deadline = Instant::now() + Duration::from_millis(100);
        while Instant::now() < deadline {
            rig.worker.step().unwrap();
        }
        assert_eq!(count_disconnects(&log), 0);
        assert_eq!(rig.worker.connections.len(), 1);
    }

    #[test]
    fn test_connect_failure_manual_unbind_stays_bound() {
        let mut rig = rig(fast_config());
        let log = new_log();
        let id = bind_handler(&mut rig, &log, |h| h.manual_unbind = true);

        // port 1 refuses on loopback
        rig.wref
            .send(WorkerCommand::Connect {
                addr: "127.0.0.1:1".parse().unwrap(),
                id,
            })
            .unwrap();
        step_until(&mut rig.worker, || {
            has_event(&log, &Event::Disconnected("connect_failed"))
        });

        assert!(rig.worker.items.contains(id));
        assert!(!rig.worker.connections.contains_key(&id));
        assert!(!has_event(&log, &Event::Unbound));
    }

    #[test]
    fn test_connect_failure_default_unbinds() {
        let mut rig = rig(fast_config());
        let log = new_log();
        let id = bind_handler(&mut rig, &log, |_| {});

        rig.wref
            .send(WorkerCommand::Connect {
                addr: "127.0.0.1:1".parse().unwrap(),
                id,
            })
            .unwrap();
        step_until(&mut rig.worker, || {
            has_event(&log, &Event::Disconnected("connect_failed"))
        });

        assert!(!rig.worker.items.contains(id));
        assert!(has_event(&log, &Event::Unbound));
    }

    struct PlainItem {
        context: Context,
    }

    impl WorkerItem for PlainItem {
        fn context(&self) -> &Context {
            &self.context
        }
    }

    #[test]
    fn test_connect_requires_handler_capability() {
        let mut rig = rig(fast_config());
        let id = next_id(&rig);
        let context = Context::new(id, rig.wref.clone());
        rig.wref
            .send(WorkerCommand::BindWithContext {
                context,
                factory: Box::new(|ctx| Box::new(PlainItem { context: ctx }) as Box<dyn WorkerItem>),
            })
            .unwrap();
        rig.worker.step().unwrap();

        let addr = "127.0.0.1:1".parse().unwrap();
        let err = rig.worker.client_connect(addr, id).unwrap_err();
        assert!(matches!(err, WorkerError::NotAHandler(i) if i == id));
        // the abort leaves the item bound and creates no connection
        assert!(rig.worker.items.contains(id));
        assert!(rig.worker.connections.is_empty());

        let err = rig
            .worker
            .client_connect(addr, ItemId::new(777))
            .unwrap_err();
        assert!(matches!(err, WorkerError::UnknownItem(i) if i == ItemId::new(777)));
    }

    #[test]
    fn test_client_connect_round_trip() {
        let mut rig = rig(fast_config());
        let log = new_log();
        let id = bind_handler(&mut rig, &log, |h| h.echo = true);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        rig.wref
            .send(WorkerCommand::Connect {
                addr: listener.local_addr().unwrap(),
                id,
            })
            .unwrap();

        let mut accepted: Option<std::net::TcpStream> = None;
        listener.set_nonblocking(true).unwrap();
        step_until(&mut rig.worker, || {
            if accepted.is_none() {
                if let Ok((stream, _)) = listener.accept() {
                    accepted = Some(stream);
                }
            }
            accepted.is_some() && has_event(&log, &Event::Connected)
        });

        // remote closes right after connect: Connecting -> Open -> Closed
        drop(accepted);
        step_until(&mut rig.worker, || {
            has_event(&log, &Event::Disconnected("closed"))
        });
        assert_eq!(count_disconnects(&log), 1);
        // server-table row: plain client unbinds on close
        assert!(!rig.worker.items.contains(id));
    }

    #[test]
    fn test_handler_swap_mid_stream() {
        let mut rig = rig(fast_config());
        let (server, _server_rx, logs, _) = register_server(&mut rig, None);
        let mut client = accept_into(&rig, &server);

        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let first_log = Arc::clone(&logs.lock().unwrap()[0]);
        step_until(&mut rig.worker, || has_event(&first_log, &Event::Connected));

        client.write_all(b"abc").unwrap();
        step_until(&mut rig.worker, || {
            has_event(&first_log, &Event::Bytes(b"abc".to_vec()))
        });

        let id = *rig.worker.connections.keys().next().unwrap();
        let second_log = new_log();
        let replacement = TestHandler::new(
            Context::new(id, rig.wref.clone()),
            Arc::clone(&second_log),
        );
        rig.wref
            .send(WorkerCommand::SwapHandler {
                handler: Box::new(replacement),
            })
            .unwrap();
        rig.worker.step().unwrap();

        assert!(has_event(&first_log, &Event::Unbound));
        assert!(has_event(&second_log, &Event::Bound));

        client.write_all(b"def").unwrap();
        step_until(&mut rig.worker, || {
            has_event(&second_log, &Event::Bytes(b"def".to_vec()))
        });
        assert!(!has_event(&first_log, &Event::Bytes(b"def".to_vec())));
    }

    #[test]
    fn test_swap_without_connection_is_noop() {
        let mut rig = rig(fast_config());
        let log = new_log();
        let handler = TestHandler::new(
            Context::new(ItemId::new(999), rig.wref.clone()),
            Arc::clone(&log),
        );
        rig.wref
            .send(WorkerCommand::SwapHandler {
                handler: Box::new(handler),
            })
            .unwrap();
        rig.worker.step().unwrap();
        assert!(log.lock().unwrap().is_empty());
        assert!(!rig.worker.items.contains(ItemId::new(999)));
    }

    #[test]
    fn test_unregister_server_terminates_connections() {
        let mut rig = rig(fast_config());
        let (server, server_rx, logs, shutdowns) = register_server(&mut rig, None);
        let _client_a = accept_into(&rig, &server);
        let _client_b = accept_into(&rig, &server);

        step_until(&mut rig.worker, || logs.lock().unwrap().len() == 2);
        let log_a = Arc::clone(&logs.lock().unwrap()[0]);
        let log_b = Arc::clone(&logs.lock().unwrap()[1]);
        step_until(&mut rig.worker, || {
            has_event(&log_a, &Event::Connected) && has_event(&log_b, &Event::Connected)
        });

        rig.wref
            .send(WorkerCommand::UnregisterServer { id: server.id() })
            .unwrap();
        rig.worker.step().unwrap();

        assert!(has_event(&log_a, &Event::Disconnected("terminated")));
        assert!(has_event(&log_b, &Event::Disconnected("terminated")));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(rig.worker.connections.is_empty());

        // a later accept is refused with the socket handed back
        let _client_c = accept_into(&rig, &server);
        rig.worker.step().unwrap();
        let refused = server_rx
            .try_iter()
            .find(|n| matches!(n, WorkerNotification::ConnectionRefused { .. }));
        match refused {
            Some(WorkerNotification::ConnectionRefused { stream, attempt }) => {
                assert!(stream.is_some());
                assert_eq!(attempt, 1);
            }
            _ => panic!("expected ConnectionRefused"),
        }
    }

    #[test]
    fn test_server_shutdown_request_is_graceful() {
        let mut rig = rig(fast_config());
        let (server, _server_rx, logs, shutdowns) = register_server(&mut rig, None);
        let _client = accept_into(&rig, &server);

        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);
        step_until(&mut rig.worker, || has_event(&log, &Event::Connected));

        rig.wref
            .send(WorkerCommand::ServerShutdownRequest { id: server.id() })
            .unwrap();
        rig.worker.step().unwrap();

        // handler chose to disconnect; the initializer stays registered
        assert!(has_event(&log, &Event::ShutdownRequest));
        assert!(has_event(&log, &Event::Disconnected("disconnect")));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 0);
        assert!(rig.worker.servers.contains(server.id()));
    }

    #[test]
    fn test_watched_handler_death_closes_connection() {
        let mut rig = rig(fast_config());
        let (guard, token) = liveness();
        let (server, _server_rx, logs, _) = register_server(&mut rig, Some(token));
        let _client = accept_into(&rig, &server);

        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);
        step_until(&mut rig.worker, || has_event(&log, &Event::Connected));
        assert_eq!(rig.worker.watched.len(), 1);

        drop(guard);
        step_until(&mut rig.worker, || {
            has_event(&log, &Event::Disconnected("disconnect"))
        });
        assert!(rig.worker.watched.is_empty());
        assert!(rig.worker.connections.is_empty());
    }

    #[test]
    fn test_message_delivery_in_order() {
        let mut rig = rig(fast_config());
        let log = new_log();
        let id = bind_handler(&mut rig, &log, |_| {});

        let (tx, _rx) = unbounded();
        for n in [1u32, 2, 3] {
            rig.wref
                .send(WorkerCommand::Message {
                    id,
                    payload: Box::new(n),
                    reply: ReplyHandle::new(tx.clone()),
                })
                .unwrap();
        }
        step_until(&mut rig.worker, || {
            log.lock()
                .unwrap()
                .iter()
                .filter(|e| matches!(e, Event::Message(_)))
                .count()
                == 3
        });

        let messages: Vec<Event> = log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, Event::Message(_)))
            .cloned()
            .collect();
        assert_eq!(
            messages,
            vec![Event::Message(1), Event::Message(2), Event::Message(3)]
        );
    }

    #[test]
    fn test_message_to_unknown_item_fails_delivery() {
        let mut rig = rig(fast_config());
        let (tx, rx) = unbounded();
        rig.wref
            .send(WorkerCommand::Message {
                id: ItemId::new(424242),
                payload: Box::new(7u32),
                reply: ReplyHandle::new(tx),
            })
            .unwrap();
        rig.worker.step().unwrap();

        match rx.try_recv().unwrap() {
            WorkerNotification::MessageDeliveryFailed { id, payload } => {
                assert_eq!(id, ItemId::new(424242));
                assert_eq!(*payload.downcast::<u32>().unwrap(), 7);
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[test]
    fn test_scheduled_command_arrives_later() {
        let mut rig = rig(fast_config());
        let (server, _server_rx, logs, _) = register_server(&mut rig, None);
        let _client = accept_into(&rig, &server);
        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);
        step_until(&mut rig.worker, || has_event(&log, &Event::Connected));

        let id = *rig.worker.connections.keys().next().unwrap();
        rig.wref
            .send(WorkerCommand::Schedule {
                delay: Duration::from_millis(100),
                command: Box::new(WorkerCommand::Disconnect { id }),
            })
            .unwrap();
        rig.worker.step().unwrap();
        // not yet due
        assert!(rig.worker.connections.contains_key(&id));

        step_until(&mut rig.worker, || {
            has_event(&log, &Event::Disconnected("disconnect"))
        });
    }

    #[test]
    fn test_check_idle_connections_acknowledges() {
        let mut rig = rig(fast_config());
        let (tx, rx) = unbounded();
        rig.wref
            .send(WorkerCommand::CheckIdleConnections {
                reply: ReplyHandle::new(tx),
            })
            .unwrap();
        rig.worker.step().unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            WorkerNotification::IdleCheckExecuted
        ));
    }

    #[test]
    fn test_summary_snapshot_fields() {
        let mut rig = rig(fast_config());
        let (server, _server_rx, logs, _) = register_server(&mut rig, None);
        let mut client = accept_into(&rig, &server);
        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);

        client.write_all(b"12345").unwrap();
        step_until(&mut rig.worker, || {
            has_event(&log, &Event::Bytes(b"12345".to_vec()))
        });

        let (tx, rx) = unbounded();
        rig.wref
            .send(WorkerCommand::ConnectionSummary {
                reply: ReplyHandle::new(tx),
            })
            .unwrap();
        rig.worker.step().unwrap();
        match rx.try_recv().unwrap() {
            WorkerNotification::ConnectionSummary(snapshots) => {
                assert_eq!(snapshots.len(), 1);
                let snap = &snapshots[0];
                assert_eq!(snap.role, Role::Server);
                assert_eq!(snap.bytes_in, 5);
                assert!(snap.peer_addr.is_some());
            }
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[test]
    fn test_shutdown_terminates_everything() {
        let mut rig = rig(fast_config());
        let (server, _server_rx, logs, shutdowns) = register_server(&mut rig, None);
        let _client = accept_into(&rig, &server);
        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);
        step_until(&mut rig.worker, || has_event(&log, &Event::Connected));

        rig.wref.send(WorkerCommand::Shutdown).unwrap();
        rig.worker.step().unwrap();
        assert!(!rig.worker.running);

        rig.worker.run_shutdown();
        assert!(has_event(&log, &Event::Disconnected("terminated")));
        assert_eq!(shutdowns.load(Ordering::SeqCst), 1);
        assert!(rig.worker.connections.is_empty());
        assert!(rig.worker.items.is_empty());
    }

    #[test]
    fn test_kill_closes_with_error_cause() {
        let mut rig = rig(fast_config());
        let (server, _server_rx, logs, _) = register_server(&mut rig, None);
        let _client = accept_into(&rig, &server);
        step_until(&mut rig.worker, || !logs.lock().unwrap().is_empty());
        let log = Arc::clone(&logs.lock().unwrap()[0]);
        step_until(&mut rig.worker, || has_event(&log, &Event::Connected));

        let id = *rig.worker.connections.keys().next().unwrap();
        rig.wref
            .send(WorkerCommand::Kill {
                id,
                error: io::Error::from(io::ErrorKind::TimedOut),
            })
            .unwrap();
        rig.worker.step().unwrap();
        assert!(has_event(&log, &Event::Disconnected("error")));
    }

    #[test]
    fn test_callbacks_run_on_worker_thread() {
        let mut rig = rig(fast_config());
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_cb = Arc::clone(&hits);
        rig.wref
            .execute(move || {
                hits_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        rig.worker.step().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
