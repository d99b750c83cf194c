//! Error types for worker and I/O system operations

use std::io;

use thiserror::Error;

use crate::id::ItemId;

/// Result type for worker operations
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur in worker and registry operations
#[derive(Debug, Error)]
pub enum WorkerError {
    /// An item with this id is already bound (programming error)
    #[error("item {0} is already bound")]
    AlreadyBound(ItemId),

    /// No item is bound with this id
    #[error("no item bound with id {0}")]
    UnknownItem(ItemId),

    /// The addressed item cannot own a connection
    #[error("item {0} has no connection-handler capability")]
    NotAHandler(ItemId),

    /// The worker's command mailbox is gone (worker stopped)
    #[error("worker mailbox closed")]
    MailboxClosed,

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),
}
