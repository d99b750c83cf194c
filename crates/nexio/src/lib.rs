//! # nexio - Worker-per-thread TCP I/O engine
//!
//! High-throughput nonblocking TCP for Rust: a pool of single-threaded
//! workers, each owning a readiness selector and the full lifecycle of the
//! connections bound to it.
//!
//! ## Features
//!
//! - **Single-threaded workers**: every connection, handler, and registry is
//!   owned by exactly one worker thread; no locks on the hot path
//! - **Readiness loop**: bounded 1ms selector polls interleaved with a
//!   batched command mailbox
//! - **Dual connection flows**: server-accepted sockets and client-initiated
//!   connects share one state machine
//! - **Handler lifecycle**: bind, live handler swap, manual-unbind
//!   reconnection policy, watched-handler liveness
//! - **Idle policy**: per-connection timeouts driven by a periodic sweep
//!
//! ## Quick Start
//!
//! ```ignore
//! use nexio::{IoConfig, IoSystem, Initializer};
//!
//! fn main() {
//!     let system = IoSystem::start(IoConfig::default()).unwrap();
//!
//!     // Register a server on every worker
//!     let (server, notifications) = system.new_server("echo");
//!     system.register_server(&server, || Ok(Box::new(MyInitializer))).unwrap();
//!
//!     // The external acceptor feeds sockets in
//!     let listener = std::net::TcpListener::bind("0.0.0.0:9000").unwrap();
//!     loop {
//!         let (socket, _) = listener.accept().unwrap();
//!         system.accept(&server, socket, 1).unwrap();
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        User Code                            │
//! │        handlers, initializers, IoCommand dispatch           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        IoSystem                             │
//! │      round-robin routing, item ids, server broadcast        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//!    ┌───────────┐      ┌───────────┐      ┌───────────┐
//!    │  Worker   │      │  Worker   │      │   Timer   │
//!    │  Thread   │      │  Thread   │      │   Thread  │
//!    └───────────┘      └───────────┘      └───────────┘
//!          │                   │
//!          ▼                   ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │           Selector + Connections + Registries           │
//!    │     one readiness loop per worker, strictly owned       │
//!    └─────────────────────────────────────────────────────────┘
//! ```

// Re-export core types
pub use nexio_core::{
    liveness, DisconnectCause, ItemId, LivenessGuard, LivenessToken, ServerId, WorkerError,
    WorkerId, WorkerResult,
};

// Re-export the engine surface
pub use nexio_runtime::{
    ConnectionCtx, ConnectionHandler, ConnectionSnapshot, ConnectionState, Context, Initializer,
    IoCommand, IoConfig, IoSystem, OutputBuffer, Payload, ReplyHandle, Role, ServerHandle,
    TimerRef, TimerThread, Worker, WorkerCommand, WorkerItem, WorkerNotification, WorkerRef,
};
