//! I/O system: the worker pool and its command routing
//!
//! Owns the worker threads, the timer thread, and the shared item id
//! counter. Workers run on named OS threads; the system round-robins
//! incoming commands and accepted sockets across them and broadcasts
//! server lifecycle changes to every worker.

use std::io;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};
use tracing::{debug, info};

use nexio_core::{ItemId, ServerId, WorkerError, WorkerId, WorkerResult};

use crate::command::{IoCommand, WorkerCommand, WorkerNotification, WorkerRef};
use crate::config::IoConfig;
use crate::handler::Initializer;
use crate::item::Context;
use crate::servers::ServerHandle;
use crate::timer::TimerThread;
use crate::worker::Worker;

/// How long to wait for each worker's ready announcement at startup
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// The worker pool plus the collaborators every worker shares
pub struct IoSystem {
    workers: Vec<WorkerRef>,
    handles: Vec<JoinHandle<()>>,
    timer: Option<TimerThread>,
    ids: Arc<AtomicU64>,
    next_server: AtomicU64,
    cursor: AtomicUsize,
}

impl IoSystem {
    /// Validate the configuration, spawn the workers, and wait until every
    /// worker has announced itself ready
    pub fn start(config: IoConfig) -> WorkerResult<IoSystem> {
        config.validate().map_err(WorkerError::InvalidConfig)?;

        let timer = TimerThread::start()?;
        let ids = Arc::new(AtomicU64::new(1));
        let (ready_tx, ready_rx) = unbounded();

        let mut workers = Vec::with_capacity(config.num_workers);
        let mut handles = Vec::with_capacity(config.num_workers);
        for i in 0..config.num_workers {
            let (worker, wref) = Worker::new(
                WorkerId::new(i as u16),
                config.clone(),
                Arc::clone(&ids),
                timer.handle(),
                ready_tx.clone(),
            )?;
            let handle = thread::Builder::new()
                .name(format!("nexio-worker-{}", i))
                .spawn(move || worker.run())?;
            workers.push(wref);
            handles.push(handle);
        }

        for _ in 0..config.num_workers {
            match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
                Ok(WorkerNotification::WorkerReady(w)) => {
                    debug!(worker = %w.id(), "worker ready");
                }
                Ok(other) => debug!(notification = ?other, "unexpected startup notification"),
                Err(_) => {
                    return Err(WorkerError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "worker failed to start",
                    )))
                }
            }
        }

        info!(workers = workers.len(), "I/O system started");
        Ok(IoSystem {
            workers,
            handles,
            timer: Some(timer),
            ids,
            next_server: AtomicU64::new(1),
            cursor: AtomicUsize::new(0),
        })
    }

    /// Handles to every worker
    pub fn workers(&self) -> &[WorkerRef] {
        &self.workers
    }

    /// Handle to one worker by id
    pub fn worker(&self, id: WorkerId) -> Option<&WorkerRef> {
        self.workers.get(id.as_usize())
    }

    fn next_worker(&self) -> &WorkerRef {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.workers.len();
        &self.workers[i]
    }

    /// Allocate an item id and pick the worker it will live on
    ///
    /// Use with `IoCommand::BindWithContext` when the caller needs the id
    /// before the bind happens.
    pub fn reserve_context(&self) -> Context {
        let worker = self.next_worker().clone();
        Context::new(ItemId::new(self.ids.fetch_add(1, Ordering::Relaxed)), worker)
    }

    /// Route a command onto a worker
    pub fn dispatch(&self, command: IoCommand) -> WorkerResult<()> {
        match command {
            IoCommand::BindItem(factory) => self.next_worker().send(WorkerCommand::Bind {
                factory,
                and_connect: None,
            }),
            IoCommand::BindAndConnect(addr, factory) => {
                self.next_worker().send(WorkerCommand::Bind {
                    factory,
                    and_connect: Some(addr),
                })
            }
            IoCommand::BindWithContext(context, factory) => {
                let worker = context.worker().clone();
                worker.send(WorkerCommand::BindWithContext { context, factory })
            }
        }
    }

    /// Create a server identity and the channel its notifications arrive on
    pub fn new_server(&self, name: &str) -> (ServerHandle, Receiver<WorkerNotification>) {
        let (tx, rx) = unbounded();
        let id = ServerId::new(self.next_server.fetch_add(1, Ordering::Relaxed));
        (ServerHandle::new(id, name, tx), rx)
    }

    /// Install the server's initializer on every worker
    ///
    /// `make` runs once per worker, inside that worker. Each worker replies
    /// `ServerRegistered` or `RegistrationFailed` on the server's channel.
    pub fn register_server<F>(&self, server: &ServerHandle, make: F) -> WorkerResult<()>
    where
        F: Fn() -> io::Result<Box<dyn Initializer>> + Send + Clone + 'static,
    {
        for worker in &self.workers {
            let make = make.clone();
            worker.send(WorkerCommand::RegisterServer {
                server: server.clone(),
                factory: Box::new(move || make()),
                reply: server.reply_handle(),
            })?;
        }
        Ok(())
    }

    /// Tear the server down on every worker
    pub fn unregister_server(&self, server: &ServerHandle) -> WorkerResult<()> {
        for worker in &self.workers {
            worker.send(WorkerCommand::UnregisterServer { id: server.id() })?;
        }
        Ok(())
    }

    /// Ask every connection of the server to wind down gracefully
    pub fn server_shutdown_request(&self, server: &ServerHandle) -> WorkerResult<()> {
        for worker in &self.workers {
            worker.send(WorkerCommand::ServerShutdownRequest { id: server.id() })?;
        }
        Ok(())
    }

    /// Hand a freshly accepted socket to a worker
    pub fn accept(
        &self,
        server: &ServerHandle,
        stream: std::net::TcpStream,
        attempt: u32,
    ) -> WorkerResult<()> {
        stream.set_nonblocking(true)?;
        let stream = mio::net::TcpStream::from_std(stream);
        self.next_worker().send(WorkerCommand::NewConnection {
            server: server.clone(),
            stream,
            attempt,
        })
    }

    /// Stop every worker, join their threads, and stop the timer
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.handles.is_empty() {
            return;
        }
        for worker in &self.workers {
            let _ = worker.send(WorkerCommand::Shutdown);
        }
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
        if let Some(timer) = self.timer.take() {
            timer.shutdown();
        }
        info!("I/O system stopped");
    }
}

impl Drop for IoSystem {
    fn drop(&mut self) {
        self.stop();
    }
}
