//! # nexio-core
//!
//! Foundation types for the nexio TCP I/O engine.
//!
//! This crate is I/O-free and contains no selector or socket code; the
//! engine itself lives in `nexio-runtime`.
//!
//! ## Modules
//!
//! - `id` - worker, item, and server identifier types
//! - `cause` - disconnect cause taxonomy
//! - `error` - error types
//! - `liveness` - liveness tokens for watched handlers

pub mod cause;
pub mod error;
pub mod id;
pub mod liveness;

// Re-exports for convenience
pub use cause::DisconnectCause;
pub use error::{WorkerError, WorkerResult};
pub use id::{ItemId, ServerId, WorkerId};
pub use liveness::{liveness, LivenessGuard, LivenessToken};

/// Defaults shared between configuration and the engine
pub mod constants {
    use std::time::Duration;

    /// Maximum workers (OS threads) in one I/O system
    pub const MAX_WORKERS: usize = 64;

    /// Selector poll ceiling
    pub const DEFAULT_SELECT_TIMEOUT: Duration = Duration::from_millis(1);

    /// Period between idle sweeps
    pub const DEFAULT_IDLE_CHECK_FREQUENCY: Duration = Duration::from_millis(100);

    /// Per-worker shared read buffer (128 KiB)
    pub const DEFAULT_READ_BUFFER_SIZE: usize = 128 * 1024;

    /// Per-worker dynamic output buffer ceiling (4 MiB)
    pub const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

    /// Commands drained from the mailbox per loop iteration
    pub const DEFAULT_MAILBOX_BATCH: usize = 256;
}
