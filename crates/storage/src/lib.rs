//! Storage contract for rill message streams
//!
//! This crate defines the behavioral contract that every stream store
//! backend satisfies: the message record and state snapshot types, the
//! configuration surface, the subject grammar used for filtering, and the
//! `StreamStorage` trait itself. Backends (memory, file) each provide their
//! own concrete state and dispatch through this narrow interface.

pub mod config;
pub mod error;
pub mod stream;
pub mod subject;

// Re-export the essential types
pub use config::{DiscardPolicy, StorageType, StreamConfig};
pub use error::{StorageError, StorageResult};
pub use stream::{
    MESSAGE_HEADER_SIZE, StoredMessage, StreamState, StreamStorage, SubjectState,
    stored_message_size,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
