//! Errors shared by stream store backends.
//!
//! The identities here are part of the storage contract: callers tailing a
//! stream rely on the distinction between a deleted sequence
//! (`MessageNotFound`) and one past the end of the stream (`EndOfStream`),
//! and the identities are the same no matter which backend serves the
//! stream.

use thiserror::Error;

/// Result type for stream storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in stream storage operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The store has been stopped
    #[error("stream store is closed")]
    Closed,

    /// No message exists at the requested sequence (deleted or trimmed)
    #[error("no message found")]
    MessageNotFound,

    /// The requested sequence is past the end of the stream
    #[error("end of stream")]
    EndOfStream,

    /// The sequence is not valid for the requested operation
    #[error("invalid sequence")]
    InvalidSequence,

    /// The configuration names a storage backend this store does not provide
    #[error("wrong storage type")]
    WrongStorageType,

    /// The stream is at its message limit and refuses new messages
    #[error("maximum messages exceeded")]
    MaxMessages,

    /// The stream is at its byte limit and refuses new messages
    #[error("maximum bytes exceeded")]
    MaxBytes,

    /// The subject does not match the stream's configured filters
    #[error("subject does not match stream filters: {0}")]
    UnexpectedSubject(String),

    /// The configuration is invalid
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
