use crate::transport::TransportError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`Store`](crate::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("store data could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another process owns the store directory.
    #[error("another writer holds the lock on {}", .0.display())]
    Locked(PathBuf),
}

/// Errors surfaced by timeline operations.
///
/// Duplicate deliveries, unknown redaction targets and exhausted pagination
/// tokens never show up here: the timeline absorbs them.
#[derive(Debug, Error)]
pub enum TimelineError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The caller cancelled the operation before the response arrived.
    /// Cursors and end flags are untouched.
    #[error("operation was cancelled")]
    Cancelled,
}
