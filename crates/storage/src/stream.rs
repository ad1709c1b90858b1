//! The stream storage contract.
//!
//! This module defines the message record, the state snapshot types and the
//! `StreamStorage` trait that every backend implements. The trait is a
//! behavioral contract, not an inheritance hierarchy: each backend keeps its
//! own concrete state and callers dispatch through this narrow interface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::{StorageType, StreamConfig};
use crate::error::StorageResult;

/// Fixed per-record overhead used by stored-size accounting: sequence,
/// timestamp and the two length fields of the record header.
pub const MESSAGE_HEADER_SIZE: u64 = 16;

/// Stored size of a message: subject + headers + payload + record header.
///
/// Byte-limit math across backends depends on this exact formula.
#[must_use]
pub fn stored_message_size(subject: &str, headers: Option<&[u8]>, payload: &[u8]) -> u64 {
    subject.len() as u64
        + headers.map_or(0, |h| h.len() as u64)
        + payload.len() as u64
        + MESSAGE_HEADER_SIZE
}

/// A single message held by a stream store.
///
/// Records are immutable once stored. The `Bytes` fields are cheap
/// reference-counted handles: loading a message never copies the stored
/// buffers, and a loaded record stays valid regardless of later mutations
/// to the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Subject the message was stored under
    pub subject: String,
    /// Optional opaque header bytes
    pub headers: Option<Bytes>,
    /// Opaque payload bytes
    pub payload: Bytes,
    /// Sequence assigned at store time
    pub seq: u64,
    /// Nanoseconds since the Unix epoch, assigned at store time; strictly
    /// monotonic within a store
    pub timestamp: i64,
}

impl StoredMessage {
    /// Stored size of this record per the shared accounting formula.
    #[must_use]
    pub fn size(&self) -> u64 {
        stored_message_size(&self.subject, self.headers.as_deref(), &self.payload)
    }
}

/// Snapshot of a stream's state.
///
/// `deleted` lists interior deletion gaps in ascending order; leading and
/// trailing trimmed ranges are not reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamState {
    /// Number of stored messages
    pub messages: u64,
    /// Total stored bytes
    pub bytes: u64,
    /// Lowest sequence in the stream (or the next sequence when empty)
    pub first_seq: u64,
    /// Timestamp of the first message, zero when empty
    pub first_timestamp: i64,
    /// Highest sequence ever assigned
    pub last_seq: u64,
    /// Timestamp of the last stored message
    pub last_timestamp: i64,
    /// Number of distinct subjects with stored messages
    pub num_subjects: usize,
    /// Number of interior deletion gaps
    pub num_deleted: usize,
    /// Interior deletion gaps, ascending
    pub deleted: Vec<u64>,
}

/// Per-subject summary of stored messages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectState {
    /// Number of messages stored under the subject
    pub messages: u64,
    /// Lowest sequence carrying the subject
    pub first_seq: u64,
    /// Highest sequence carrying the subject
    pub last_seq: u64,
}

/// Contract shared by every stream store backend.
///
/// All operations are safe for concurrent invocation; each observed state
/// reflects some totally-ordered prefix of applied operations.
#[async_trait]
pub trait StreamStorage: Send + Sync + 'static {
    /// Append a message, returning its assigned sequence and timestamp.
    ///
    /// Retention runs after the append and may immediately discard the
    /// message; the returned sequence was still assigned and is never
    /// reused.
    async fn store_msg(
        &self,
        subject: &str,
        headers: Option<Bytes>,
        payload: Bytes,
    ) -> StorageResult<(u64, i64)>;

    /// Load the message at a sequence.
    ///
    /// Returns `EndOfStream` past the last sequence and `MessageNotFound`
    /// for deleted or trimmed sequences within range.
    async fn load_msg(&self, seq: u64) -> StorageResult<StoredMessage>;

    /// Load the first message at or above `start_seq` whose subject matches
    /// the pattern. An empty pattern matches every subject. Returns
    /// `EndOfStream` when no stored message matches.
    async fn load_next_msg(&self, pattern: &str, start_seq: u64) -> StorageResult<StoredMessage>;

    /// Remove the message at a sequence. Returns `Ok(false)` when no such
    /// message exists.
    async fn remove_msg(&self, seq: u64) -> StorageResult<bool>;

    /// As `remove_msg`, additionally scrubbing the stored header and
    /// payload buffers best-effort before release.
    async fn erase_msg(&self, seq: u64) -> StorageResult<bool>;

    /// Remove all messages, preserving sequence continuity
    /// (`first_seq` becomes `last_seq + 1`). Returns the number removed.
    async fn purge(&self) -> StorageResult<u64>;

    /// Remove messages matching a subject pattern with sequence at or above
    /// `start_seq`, retaining the `keep` most recent matches. An empty
    /// pattern matches every subject. Returns the number removed.
    async fn purge_filtered(&self, pattern: &str, start_seq: u64, keep: u64)
    -> StorageResult<u64>;

    /// Remove all messages below `seq`, advancing the stream floor to
    /// exactly `seq`. Compacting past the end empties the stream and sets
    /// the floor so the next store is assigned `seq`. Returns the number of
    /// records removed.
    async fn compact(&self, seq: u64) -> StorageResult<u64>;

    /// Drop all messages above `seq`, which becomes the new `last_seq`.
    /// `truncate(0)` fully resets the stream identity. Returns
    /// `InvalidSequence` when `seq` is past the end.
    async fn truncate(&self, seq: u64) -> StorageResult<()>;

    /// Smallest sequence whose message timestamp is at or after the given
    /// time, or `last_seq + 1` when no stored message qualifies.
    async fn first_seq_for_time(&self, timestamp: i64) -> StorageResult<u64>;

    /// Full state snapshot, including the interior deletion gap list.
    async fn state(&self) -> StreamState;

    /// Fill `state` with counters only: `deleted` is left empty and
    /// `num_deleted` is derived arithmetically from the sequence range.
    async fn fast_state(&self, state: &mut StreamState);

    /// Per-subject summaries for subjects matching the pattern. An empty
    /// pattern matches every subject.
    async fn subjects_state(&self, pattern: &str) -> HashMap<String, SubjectState>;

    /// Number of distinct subjects with stored messages.
    async fn num_subjects(&self) -> usize;

    /// Validate and swap the configuration, immediately re-applying
    /// retention if any limit tightened.
    async fn update_config(&self, config: StreamConfig) -> StorageResult<()>;

    /// Stop the store: cancel background work and release records.
    /// Subsequent operations return `Closed`. Idempotent.
    async fn stop(&self);

    /// Which backend this store is.
    fn storage_type(&self) -> StorageType;
}

/// Implement StreamStorage for Arc<T> where T: StreamStorage
#[async_trait]
impl<T: StreamStorage> StreamStorage for Arc<T> {
    async fn store_msg(
        &self,
        subject: &str,
        headers: Option<Bytes>,
        payload: Bytes,
    ) -> StorageResult<(u64, i64)> {
        (**self).store_msg(subject, headers, payload).await
    }

    async fn load_msg(&self, seq: u64) -> StorageResult<StoredMessage> {
        (**self).load_msg(seq).await
    }

    async fn load_next_msg(&self, pattern: &str, start_seq: u64) -> StorageResult<StoredMessage> {
        (**self).load_next_msg(pattern, start_seq).await
    }

    async fn remove_msg(&self, seq: u64) -> StorageResult<bool> {
        (**self).remove_msg(seq).await
    }

    async fn erase_msg(&self, seq: u64) -> StorageResult<bool> {
        (**self).erase_msg(seq).await
    }

    async fn purge(&self) -> StorageResult<u64> {
        (**self).purge().await
    }

    async fn purge_filtered(
        &self,
        pattern: &str,
        start_seq: u64,
        keep: u64,
    ) -> StorageResult<u64> {
        (**self).purge_filtered(pattern, start_seq, keep).await
    }

    async fn compact(&self, seq: u64) -> StorageResult<u64> {
        (**self).compact(seq).await
    }

    async fn truncate(&self, seq: u64) -> StorageResult<()> {
        (**self).truncate(seq).await
    }

    async fn first_seq_for_time(&self, timestamp: i64) -> StorageResult<u64> {
        (**self).first_seq_for_time(timestamp).await
    }

    async fn state(&self) -> StreamState {
        (**self).state().await
    }

    async fn fast_state(&self, state: &mut StreamState) {
        (**self).fast_state(state).await;
    }

    async fn subjects_state(&self, pattern: &str) -> HashMap<String, SubjectState> {
        (**self).subjects_state(pattern).await
    }

    async fn num_subjects(&self) -> usize {
        (**self).num_subjects().await
    }

    async fn update_config(&self, config: StreamConfig) -> StorageResult<()> {
        (**self).update_config(config).await
    }

    async fn stop(&self) {
        (**self).stop().await;
    }

    fn storage_type(&self) -> StorageType {
        (**self).storage_type()
    }
}
