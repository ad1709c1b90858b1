//! Stream configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::subject;

/// Storage backend selector for a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageType {
    /// Messages are held in memory only
    Memory,
    /// Messages are persisted to files
    File,
}

impl Default for StorageType {
    fn default() -> Self {
        Self::Memory
    }
}

/// What to do with an incoming message once a retention limit is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardPolicy {
    /// Drop the oldest messages to make room (default)
    Old,
    /// Refuse the incoming message instead
    New,
}

impl Default for DiscardPolicy {
    fn default() -> Self {
        Self::Old
    }
}

/// Configuration for a single message stream.
///
/// Every limit treats zero as unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Stream name, used for diagnostics only
    pub name: String,
    /// Which backend holds the stream
    pub storage: StorageType,
    /// Optional subject filters; when non-empty, stored subjects must match
    /// one of these patterns
    pub subjects: Vec<String>,
    /// Maximum number of retained messages
    pub max_messages: u64,
    /// Maximum number of retained bytes, using stored-size accounting
    pub max_bytes: u64,
    /// Maximum age of a retained message
    pub max_age: Duration,
    /// Maximum number of retained messages per subject
    pub max_messages_per_subject: u64,
    /// Behavior at the message/byte limits
    pub discard: DiscardPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            storage: StorageType::Memory,
            subjects: Vec::new(),
            max_messages: 0,
            max_bytes: 0,
            max_age: Duration::ZERO,
            max_messages_per_subject: 0,
            discard: DiscardPolicy::Old,
        }
    }
}

impl StreamConfig {
    /// Validate the configuration independent of any backend.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::InvalidConfig` if a subject filter violates
    /// the subject grammar.
    pub fn validate(&self) -> StorageResult<()> {
        for pattern in &self.subjects {
            subject::validate_pattern(pattern).map_err(|e| {
                StorageError::InvalidConfig(format!("subject filter {pattern:?}: {e}"))
            })?;
        }
        Ok(())
    }

    /// Whether a subject passes the configured filter set.
    ///
    /// An empty filter set admits every valid subject.
    #[must_use]
    pub fn subject_allowed(&self, subj: &str) -> bool {
        if subject::validate_literal(subj).is_err() {
            return false;
        }
        self.subjects.is_empty()
            || self
                .subjects
                .iter()
                .any(|pattern| subject::matches_pattern(subj, pattern))
    }
}
