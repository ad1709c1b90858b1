//! In-memory message stream store.
//!
//! The log is a flat sequence-indexed `BTreeMap` plus a derived per-subject
//! index; deletion gaps are represented as absence from the map and the
//! `deleted` list is derived on demand. A single store-wide lock guards the
//! log, the index, the configuration and the counters. Age-based retention
//! runs on one self-rescheduling background task rather than per-message
//! timers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use rill_storage::{
    DiscardPolicy, StorageError, StorageResult, StorageType, StoredMessage, StreamConfig,
    StreamState, StreamStorage, SubjectState, subject,
};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info};

use crate::index::SubjectIndex;

/// Nanoseconds since the Unix epoch.
fn unix_now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// In-memory stream store.
///
/// Cheap to clone; clones share the same underlying stream. All operations
/// are safe for concurrent invocation from multiple tasks.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
    /// Wakes the age-retention task when the earliest deadline may have
    /// moved (first store into an empty stream, config update, stop).
    age_check: Arc<Notify>,
}

struct Inner {
    config: StreamConfig,
    /// Sequence-indexed log; missing interior sequences are deletion gaps.
    messages: BTreeMap<u64, StoredMessage>,
    index: SubjectIndex,
    bytes: u64,
    first_seq: u64,
    first_timestamp: i64,
    last_seq: u64,
    last_timestamp: i64,
    closed: bool,
    age_task_spawned: bool,
}

impl MemoryStore {
    /// Create a new memory stream store from a configuration.
    ///
    /// # Errors
    ///
    /// Returns `WrongStorageType` when the configuration names a different
    /// backend, or `InvalidConfig` when a subject filter is malformed.
    pub fn new(config: StreamConfig) -> StorageResult<Self> {
        if config.storage != StorageType::Memory {
            return Err(StorageError::WrongStorageType);
        }
        config.validate()?;

        info!("Creating memory stream store {:?}", config.name);

        Ok(Self {
            inner: Arc::new(RwLock::new(Inner {
                config,
                messages: BTreeMap::new(),
                index: SubjectIndex::default(),
                bytes: 0,
                first_seq: 0,
                first_timestamp: 0,
                last_seq: 0,
                last_timestamp: 0,
                closed: false,
                age_task_spawned: false,
            })),
            age_check: Arc::new(Notify::new()),
        })
    }

    /// Spawn the age-retention task: a single loop that expires the head,
    /// sleeps until the oldest message's deadline, and re-arms. It parks on
    /// the notifier while the stream is empty or has no age limit, and
    /// exits once the store is stopped.
    fn spawn_age_task(&self) {
        let inner = Arc::clone(&self.inner);
        let age_check = Arc::clone(&self.age_check);
        tokio::spawn(async move {
            loop {
                let deadline = {
                    let mut inner = inner.write().await;
                    if inner.closed {
                        return;
                    }
                    let now = unix_now_nanos();
                    inner.expire_aged_messages(now);
                    inner.next_age_deadline(now)
                };
                match deadline {
                    Some(wait) => {
                        tokio::select! {
                            () = tokio::time::sleep(wait) => {}
                            () = age_check.notified() => {}
                        }
                    }
                    None => age_check.notified().await,
                }
            }
        });
    }
}

impl Inner {
    fn check_open(&self) -> StorageResult<()> {
        if self.closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }

    fn message_count(&self) -> u64 {
        self.messages.len() as u64
    }

    /// Assign the next timestamp, bumping past the previous one when the
    /// clock has not advanced.
    fn assign_timestamp(&self) -> i64 {
        let now = unix_now_nanos();
        if now <= self.last_timestamp {
            self.last_timestamp + 1
        } else {
            now
        }
    }

    fn store_msg(
        &mut self,
        subj: &str,
        headers: Option<Bytes>,
        payload: Bytes,
    ) -> StorageResult<(u64, i64, bool)> {
        self.check_open()?;
        if !self.config.subject_allowed(subj) {
            return Err(StorageError::UnexpectedSubject(subj.to_string()));
        }

        let size = rill_storage::stored_message_size(subj, headers.as_deref(), &payload);
        if self.config.discard == DiscardPolicy::New {
            if self.config.max_messages > 0 && self.message_count() >= self.config.max_messages {
                return Err(StorageError::MaxMessages);
            }
            if self.config.max_bytes > 0 && self.bytes + size > self.config.max_bytes {
                return Err(StorageError::MaxBytes);
            }
        }

        let seq = self.last_seq + 1;
        let timestamp = self.assign_timestamp();
        let was_empty = self.messages.is_empty();

        self.messages.insert(
            seq,
            StoredMessage {
                subject: subj.to_string(),
                headers,
                payload,
                seq,
                timestamp,
            },
        );
        self.index.insert(subj, seq);
        self.bytes += size;
        self.last_seq = seq;
        self.last_timestamp = timestamp;
        if was_empty {
            self.first_seq = seq;
            self.first_timestamp = timestamp;
        }

        self.enforce_limits(subj);

        Ok((seq, timestamp, was_empty))
    }

    /// Apply retention in policy order: per-subject, count, bytes, age.
    fn enforce_limits(&mut self, subj: &str) {
        let per_subject = self.config.max_messages_per_subject;
        if per_subject > 0 {
            while self.index.count(subj) > per_subject {
                let Some(seq) = self.index.first_seq(subj) else {
                    break;
                };
                self.remove_message(seq, false);
            }
        }
        if self.config.max_messages > 0 {
            while self.message_count() > self.config.max_messages {
                if !self.remove_head() {
                    break;
                }
            }
        }
        if self.config.max_bytes > 0 {
            while self.bytes > self.config.max_bytes {
                if !self.remove_head() {
                    break;
                }
            }
        }
        if !self.config.max_age.is_zero() {
            self.expire_aged_messages(unix_now_nanos());
        }
    }

    fn remove_head(&mut self) -> bool {
        let Some((&seq, _)) = self.messages.iter().next() else {
            return false;
        };
        self.remove_message(seq, false).is_some()
    }

    /// Remove a single message, keeping the byte total, the subject index
    /// and the sequence endpoints coherent. `last_seq` is a high-water mark
    /// and never moves backwards: sequences are not reused. Returns the
    /// stored size of the removed message.
    fn remove_message(&mut self, seq: u64, erase: bool) -> Option<u64> {
        let msg = self.messages.remove(&seq)?;
        let size = msg.size();
        self.bytes = self.bytes.saturating_sub(size);
        self.index.remove(&msg.subject, seq);
        if erase {
            scrub_message(msg);
        }

        if self.messages.is_empty() {
            self.first_seq = self.last_seq + 1;
            self.first_timestamp = 0;
        } else if seq == self.first_seq
            && let Some((&next, head)) = self.messages.range(seq..).next()
        {
            self.first_seq = next;
            self.first_timestamp = head.timestamp;
        }

        Some(size)
    }

    /// Drop head messages older than the age limit. Retention removals
    /// advance `first_seq`; they never create interior gaps.
    fn expire_aged_messages(&mut self, now: i64) {
        if self.config.max_age.is_zero() {
            return;
        }
        let cutoff = now - duration_nanos(self.config.max_age);
        let mut expired = 0u64;
        loop {
            let Some((&seq, msg)) = self.messages.iter().next() else {
                break;
            };
            if msg.timestamp > cutoff {
                break;
            }
            self.remove_message(seq, false);
            expired += 1;
        }
        if expired > 0 {
            debug!(
                "Expired {} aged messages from stream {:?}",
                expired, self.config.name
            );
        }
    }

    /// Time until the oldest message reaches the age limit, or `None` when
    /// the timer has nothing to wait for.
    fn next_age_deadline(&self, now: i64) -> Option<Duration> {
        if self.config.max_age.is_zero() {
            return None;
        }
        let oldest = self.messages.values().next()?.timestamp;
        let due = oldest + duration_nanos(self.config.max_age);
        Some(Duration::from_nanos(due.saturating_sub(now).max(0) as u64))
    }

    fn load_msg(&self, seq: u64) -> StorageResult<StoredMessage> {
        self.check_open()?;
        if let Some(msg) = self.messages.get(&seq) {
            return Ok(msg.clone());
        }
        if seq > self.last_seq {
            Err(StorageError::EndOfStream)
        } else {
            Err(StorageError::MessageNotFound)
        }
    }

    fn load_next_msg(&self, pattern: &str, start_seq: u64) -> StorageResult<StoredMessage> {
        self.check_open()?;
        let start = start_seq.max(self.first_seq);

        // Literal patterns resolve through the subject index.
        if !pattern.is_empty() && subject::is_literal(pattern) {
            return match self.index.next_seq(pattern, start) {
                Some(seq) => self
                    .messages
                    .get(&seq)
                    .cloned()
                    .ok_or(StorageError::MessageNotFound),
                None => Err(StorageError::EndOfStream),
            };
        }

        self.messages
            .range(start..)
            .map(|(_, msg)| msg)
            .find(|msg| pattern.is_empty() || subject::matches_pattern(&msg.subject, pattern))
            .cloned()
            .ok_or(StorageError::EndOfStream)
    }

    fn purge(&mut self) -> u64 {
        let purged = self.message_count();
        self.messages.clear();
        self.index.clear();
        self.bytes = 0;
        self.first_seq = self.last_seq + 1;
        self.first_timestamp = 0;
        purged
    }

    fn purge_filtered(&mut self, pattern: &str, start_seq: u64, keep: u64) -> u64 {
        let mut victims = self.index.matching_seqs(pattern, start_seq);
        if keep > 0 {
            let kept = (keep as usize).min(victims.len());
            victims.truncate(victims.len() - kept);
        }
        let mut purged = 0;
        for seq in victims {
            if self.remove_message(seq, false).is_some() {
                purged += 1;
            }
        }
        purged
    }

    fn compact(&mut self, seq: u64) -> u64 {
        if seq > self.last_seq {
            // Compacting past the end empties the stream and positions the
            // floor so the next store is assigned `seq`.
            let purged = self.message_count();
            self.messages.clear();
            self.index.clear();
            self.bytes = 0;
            self.first_seq = seq;
            self.first_timestamp = 0;
            self.last_seq = seq - 1;
            return purged;
        }
        if seq <= self.first_seq {
            return 0;
        }

        let below: Vec<u64> = self.messages.range(..seq).map(|(&s, _)| s).collect();
        let mut purged = 0;
        for s in below {
            if let Some(msg) = self.messages.remove(&s) {
                self.bytes = self.bytes.saturating_sub(msg.size());
                self.index.remove(&msg.subject, s);
                purged += 1;
            }
        }
        // The floor lands exactly on the compaction point, which may be a
        // deletion gap.
        self.first_seq = seq;
        self.first_timestamp = self.messages.get(&seq).map_or(0, |msg| msg.timestamp);
        purged
    }

    fn truncate(&mut self, seq: u64) -> StorageResult<u64> {
        if seq == 0 {
            // Full reset of the stream identity.
            let removed = self.message_count();
            self.messages.clear();
            self.index.clear();
            self.bytes = 0;
            self.first_seq = 0;
            self.first_timestamp = 0;
            self.last_seq = 0;
            self.last_timestamp = 0;
            return Ok(removed);
        }
        if seq > self.last_seq {
            return Err(StorageError::InvalidSequence);
        }

        let above: Vec<u64> = self.messages.range(seq + 1..).map(|(&s, _)| s).collect();
        let mut removed = 0;
        for s in above {
            if let Some(msg) = self.messages.remove(&s) {
                self.bytes = self.bytes.saturating_sub(msg.size());
                self.index.remove(&msg.subject, s);
                removed += 1;
            }
        }
        self.last_seq = seq;
        // The new tail may itself be a preserved deletion gap; take the
        // timestamp from the highest surviving record.
        self.last_timestamp = self
            .messages
            .last_key_value()
            .map_or(0, |(_, msg)| msg.timestamp);
        if self.messages.is_empty() {
            self.first_seq = self.last_seq + 1;
            self.first_timestamp = 0;
        }
        Ok(removed)
    }

    fn first_seq_for_time(&self, timestamp: i64) -> u64 {
        // Timestamps are monotonic in sequence order.
        self.messages
            .values()
            .find(|msg| msg.timestamp >= timestamp)
            .map_or(self.last_seq + 1, |msg| msg.seq)
    }

    fn update_config(&mut self, config: StreamConfig) -> StorageResult<()> {
        self.check_open()?;
        if config.storage != StorageType::Memory {
            return Err(StorageError::WrongStorageType);
        }
        config.validate()?;
        self.config = config;

        // Bring the stream back within any tightened limits, in the same
        // order retention applies them on store.
        let per_subject = self.config.max_messages_per_subject;
        if per_subject > 0 {
            for subj in self.index.over_limit(per_subject) {
                while self.index.count(&subj) > per_subject {
                    let Some(seq) = self.index.first_seq(&subj) else {
                        break;
                    };
                    self.remove_message(seq, false);
                }
            }
        }
        if self.config.max_messages > 0 {
            while self.message_count() > self.config.max_messages {
                if !self.remove_head() {
                    break;
                }
            }
        }
        if self.config.max_bytes > 0 {
            while self.bytes > self.config.max_bytes {
                if !self.remove_head() {
                    break;
                }
            }
        }
        self.expire_aged_messages(unix_now_nanos());

        Ok(())
    }

    fn state(&self) -> StreamState {
        // Deletion gaps are derived from absence: walk the live keys and
        // collect the holes after the floor, including a removed tail.
        let mut deleted = Vec::new();
        if !self.messages.is_empty() {
            let mut expected = self.first_seq + 1;
            for &seq in self.messages.keys() {
                while expected < seq {
                    deleted.push(expected);
                    expected += 1;
                }
                expected = seq + 1;
            }
            while expected <= self.last_seq {
                deleted.push(expected);
                expected += 1;
            }
        }

        StreamState {
            messages: self.message_count(),
            bytes: self.bytes,
            first_seq: self.first_seq,
            first_timestamp: self.first_timestamp,
            last_seq: self.last_seq,
            last_timestamp: self.last_timestamp,
            num_subjects: self.index.len(),
            num_deleted: deleted.len(),
            deleted,
        }
    }

    fn fast_state(&self, state: &mut StreamState) {
        state.messages = self.message_count();
        state.bytes = self.bytes;
        state.first_seq = self.first_seq;
        state.first_timestamp = self.first_timestamp;
        state.last_seq = self.last_seq;
        state.last_timestamp = self.last_timestamp;
        state.num_subjects = self.index.len();
        state.num_deleted = if self.messages.is_empty() {
            0
        } else {
            // Matches the derived deleted list: a floor sitting on a
            // deletion gap (possible after compacting to a removed
            // sequence) is not reported as deleted.
            let span = self.last_seq - self.first_seq + 1;
            let accounted = if self.messages.contains_key(&self.first_seq) {
                self.message_count()
            } else {
                self.message_count() + 1
            };
            span.saturating_sub(accounted) as usize
        };
        state.deleted.clear();
    }
}

fn duration_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Best-effort scrub: zero the buffers when this store holds the only
/// reference. Outstanding loaded copies keep their contents.
fn scrub_message(msg: StoredMessage) {
    if let Ok(mut payload) = msg.payload.try_into_mut() {
        payload.fill(0);
    }
    if let Some(headers) = msg.headers
        && let Ok(mut headers) = headers.try_into_mut()
    {
        headers.fill(0);
    }
}

#[async_trait]
impl StreamStorage for MemoryStore {
    async fn store_msg(
        &self,
        subject: &str,
        headers: Option<Bytes>,
        payload: Bytes,
    ) -> StorageResult<(u64, i64)> {
        let mut inner = self.inner.write().await;
        let (seq, timestamp, was_empty) = inner.store_msg(subject, headers, payload)?;
        let spawn_age_task = !inner.age_task_spawned && !inner.config.max_age.is_zero();
        if spawn_age_task {
            inner.age_task_spawned = true;
        }
        drop(inner);

        if spawn_age_task {
            self.spawn_age_task();
        } else if was_empty {
            self.age_check.notify_one();
        }

        Ok((seq, timestamp))
    }

    async fn load_msg(&self, seq: u64) -> StorageResult<StoredMessage> {
        self.inner.read().await.load_msg(seq)
    }

    async fn load_next_msg(&self, pattern: &str, start_seq: u64) -> StorageResult<StoredMessage> {
        self.inner.read().await.load_next_msg(pattern, start_seq)
    }

    async fn remove_msg(&self, seq: u64) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;
        inner.check_open()?;
        Ok(inner.remove_message(seq, false).is_some())
    }

    async fn erase_msg(&self, seq: u64) -> StorageResult<bool> {
        let mut inner = self.inner.write().await;
        inner.check_open()?;
        Ok(inner.remove_message(seq, true).is_some())
    }

    async fn purge(&self) -> StorageResult<u64> {
        let mut inner = self.inner.write().await;
        inner.check_open()?;
        let purged = inner.purge();
        debug!(
            "Purged {} messages from stream {:?}",
            purged, inner.config.name
        );
        Ok(purged)
    }

    async fn purge_filtered(
        &self,
        pattern: &str,
        start_seq: u64,
        keep: u64,
    ) -> StorageResult<u64> {
        let mut inner = self.inner.write().await;
        inner.check_open()?;
        let purged = inner.purge_filtered(pattern, start_seq, keep);
        debug!(
            "Purged {} messages matching {:?} from stream {:?}",
            purged, pattern, inner.config.name
        );
        Ok(purged)
    }

    async fn compact(&self, seq: u64) -> StorageResult<u64> {
        let mut inner = self.inner.write().await;
        inner.check_open()?;
        let purged = inner.compact(seq);
        debug!(
            "Compacted stream {:?} below sequence {}, removed {}",
            inner.config.name, seq, purged
        );
        Ok(purged)
    }

    async fn truncate(&self, seq: u64) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.check_open()?;
        let removed = inner.truncate(seq)?;
        debug!(
            "Truncated stream {:?} to sequence {}, removed {}",
            inner.config.name, seq, removed
        );
        Ok(())
    }

    async fn first_seq_for_time(&self, timestamp: i64) -> StorageResult<u64> {
        let inner = self.inner.read().await;
        inner.check_open()?;
        Ok(inner.first_seq_for_time(timestamp))
    }

    async fn state(&self) -> StreamState {
        self.inner.read().await.state()
    }

    async fn fast_state(&self, state: &mut StreamState) {
        self.inner.read().await.fast_state(state);
    }

    async fn subjects_state(&self, pattern: &str) -> HashMap<String, SubjectState> {
        self.inner.read().await.index.subjects_state(pattern)
    }

    async fn num_subjects(&self) -> usize {
        self.inner.read().await.index.len()
    }

    async fn update_config(&self, config: StreamConfig) -> StorageResult<()> {
        let mut inner = self.inner.write().await;
        inner.update_config(config)?;
        let spawn_age_task = !inner.age_task_spawned && !inner.config.max_age.is_zero();
        if spawn_age_task {
            inner.age_task_spawned = true;
        }
        drop(inner);

        if spawn_age_task {
            self.spawn_age_task();
        } else {
            self.age_check.notify_one();
        }
        Ok(())
    }

    async fn stop(&self) {
        let mut inner = self.inner.write().await;
        if !inner.closed {
            inner.closed = true;
            inner.messages.clear();
            inner.index.clear();
            inner.bytes = 0;
            info!("Stopped memory stream store {:?}", inner.config.name);
        }
        drop(inner);
        self.age_check.notify_one();
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Memory
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").field("inner", &"<locked>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> StreamConfig {
        StreamConfig {
            name: "TEST".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_store_and_load_roundtrip() {
        let store = MemoryStore::new(memory_config()).unwrap();

        let (seq, ts) = store
            .store_msg(
                "foo",
                Some(Bytes::from_static(b"name:derek")),
                Bytes::from_static(b"Hello World"),
            )
            .await
            .unwrap();
        assert_eq!(seq, 1);
        assert!(ts > 0);

        let msg = store.load_msg(1).await.unwrap();
        assert_eq!(msg.subject, "foo");
        assert_eq!(msg.headers.as_deref(), Some(b"name:derek".as_slice()));
        assert_eq!(msg.payload, Bytes::from_static(b"Hello World"));
        assert_eq!(msg.seq, 1);
        assert_eq!(msg.timestamp, ts);
    }

    #[tokio::test]
    async fn test_load_errors_distinguish_gap_and_eof() {
        let store = MemoryStore::new(memory_config()).unwrap();
        for _ in 0..3 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }
        store.remove_msg(2).await.unwrap();

        assert_eq!(store.load_msg(2).await, Err(StorageError::MessageNotFound));
        assert_eq!(store.load_msg(4).await, Err(StorageError::EndOfStream));
        assert!(store.load_msg(3).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_nonexistent_is_not_an_error() {
        let store = MemoryStore::new(memory_config()).unwrap();
        store
            .store_msg("foo", None, Bytes::from_static(b"ok"))
            .await
            .unwrap();

        assert_eq!(store.remove_msg(7).await, Ok(false));
        assert_eq!(store.remove_msg(1).await, Ok(true));
        // Second removal of the same sequence is also not an error.
        assert_eq!(store.remove_msg(1).await, Ok(false));
    }

    #[tokio::test]
    async fn test_timestamps_strictly_monotonic() {
        let store = MemoryStore::new(memory_config()).unwrap();
        for _ in 0..100 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }

        let mut last = 0;
        for seq in 1..=100 {
            let msg = store.load_msg(seq).await.unwrap();
            assert!(msg.timestamp > last, "timestamps must strictly increase");
            last = msg.timestamp;
        }
    }

    #[tokio::test]
    async fn test_remove_endpoints() {
        let store = MemoryStore::new(memory_config()).unwrap();
        for _ in 0..5 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }

        // Removing the head advances the floor past the gap.
        store.remove_msg(1).await.unwrap();
        store.remove_msg(2).await.unwrap();
        let state = store.state().await;
        assert_eq!(state.first_seq, 3);

        // Removing the tail keeps last_seq as a high-water mark so the
        // sequence is never reused.
        store.remove_msg(5).await.unwrap();
        let state = store.state().await;
        assert_eq!(state.last_seq, 5);
        assert_eq!(state.deleted, vec![5]);

        let (seq, _) = store
            .store_msg("foo", None, Bytes::from_static(b"ok"))
            .await
            .unwrap();
        assert_eq!(seq, 6);
    }

    #[tokio::test]
    async fn test_remove_last_remaining_message() {
        let store = MemoryStore::new(memory_config()).unwrap();
        for _ in 0..3 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }
        for seq in 1..=3 {
            store.remove_msg(seq).await.unwrap();
        }

        let state = store.state().await;
        assert_eq!(state.messages, 0);
        assert_eq!(state.first_seq, 4);
        assert_eq!(state.last_seq, 3);
        assert_eq!(state.num_deleted, 0);
    }

    #[tokio::test]
    async fn test_subject_filter_rejection() {
        let config = StreamConfig {
            subjects: vec!["orders.*".to_string()],
            ..memory_config()
        };
        let store = MemoryStore::new(config).unwrap();

        assert!(
            store
                .store_msg("orders.new", None, Bytes::new())
                .await
                .is_ok()
        );
        assert_eq!(
            store.store_msg("users.new", None, Bytes::new()).await,
            Err(StorageError::UnexpectedSubject("users.new".to_string()))
        );
        assert_eq!(
            store.store_msg("", None, Bytes::new()).await,
            Err(StorageError::UnexpectedSubject(String::new()))
        );

        // A rejected store assigns no sequence.
        let state = store.state().await;
        assert_eq!(state.last_seq, 1);
    }

    #[tokio::test]
    async fn test_wrong_storage_type() {
        let config = StreamConfig {
            storage: StorageType::File,
            ..memory_config()
        };
        assert!(matches!(
            MemoryStore::new(config),
            Err(StorageError::WrongStorageType)
        ));
    }

    #[tokio::test]
    async fn test_discard_new_refuses_at_message_limit() {
        let config = StreamConfig {
            max_messages: 3,
            discard: DiscardPolicy::New,
            ..memory_config()
        };
        let store = MemoryStore::new(config).unwrap();

        for _ in 0..3 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }
        assert_eq!(
            store.store_msg("foo", None, Bytes::from_static(b"ok")).await,
            Err(StorageError::MaxMessages)
        );

        // The refused store assigned no sequence.
        let state = store.state().await;
        assert_eq!(state.messages, 3);
        assert_eq!(state.last_seq, 3);
    }

    #[tokio::test]
    async fn test_discard_new_refuses_at_byte_limit() {
        let size = rill_storage::stored_message_size("foo", None, b"Hello World");
        let config = StreamConfig {
            max_bytes: size * 2,
            discard: DiscardPolicy::New,
            ..memory_config()
        };
        let store = MemoryStore::new(config).unwrap();

        for _ in 0..2 {
            store
                .store_msg("foo", None, Bytes::from_static(b"Hello World"))
                .await
                .unwrap();
        }
        assert_eq!(
            store
                .store_msg("foo", None, Bytes::from_static(b"Hello World"))
                .await,
            Err(StorageError::MaxBytes)
        );
    }

    #[tokio::test]
    async fn test_erase_removes_message() {
        let store = MemoryStore::new(memory_config()).unwrap();
        store
            .store_msg("foo", Some(Bytes::from(vec![7u8; 8])), Bytes::from(vec![9u8; 32]))
            .await
            .unwrap();

        assert_eq!(store.erase_msg(1).await, Ok(true));
        assert_eq!(store.load_msg(1).await, Err(StorageError::MessageNotFound));
        assert_eq!(store.erase_msg(1).await, Ok(false));
        assert_eq!(store.state().await.messages, 0);
    }

    #[tokio::test]
    async fn test_closed_store_errors() {
        let store = MemoryStore::new(memory_config()).unwrap();
        store
            .store_msg("foo", None, Bytes::from_static(b"ok"))
            .await
            .unwrap();
        store.stop().await;

        assert_eq!(
            store.store_msg("foo", None, Bytes::new()).await,
            Err(StorageError::Closed)
        );
        assert_eq!(store.load_msg(1).await, Err(StorageError::Closed));
        assert_eq!(store.remove_msg(1).await, Err(StorageError::Closed));
        assert_eq!(store.purge().await, Err(StorageError::Closed));
        assert_eq!(store.compact(1).await, Err(StorageError::Closed));
        assert_eq!(store.truncate(0).await, Err(StorageError::Closed));
        assert_eq!(
            store.update_config(memory_config()).await,
            Err(StorageError::Closed)
        );

        // Stop is idempotent.
        store.stop().await;
        assert_eq!(store.storage_type(), StorageType::Memory);
    }

    #[tokio::test]
    async fn test_first_seq_for_time() {
        let store = MemoryStore::new(memory_config()).unwrap();
        let mut stamps = Vec::new();
        for _ in 0..10 {
            let (_, ts) = store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
            stamps.push(ts);
        }

        assert_eq!(store.first_seq_for_time(0).await.unwrap(), 1);
        assert_eq!(store.first_seq_for_time(stamps[4]).await.unwrap(), 5);
        assert_eq!(store.first_seq_for_time(stamps[4] + 1).await.unwrap(), 6);
        assert_eq!(
            store.first_seq_for_time(stamps[9] + 1).await.unwrap(),
            11
        );
    }

    #[tokio::test]
    async fn test_load_next_msg() {
        let store = MemoryStore::new(memory_config()).unwrap();
        for i in 0..10 {
            let subj = if i % 2 == 0 { "foo.even" } else { "foo.odd" };
            store
                .store_msg(subj, None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }

        let msg = store.load_next_msg("foo.odd", 1).await.unwrap();
        assert_eq!(msg.seq, 2);
        let msg = store.load_next_msg("foo.odd", 3).await.unwrap();
        assert_eq!(msg.seq, 4);
        let msg = store.load_next_msg("foo.*", 5).await.unwrap();
        assert_eq!(msg.seq, 5);
        let msg = store.load_next_msg("", 7).await.unwrap();
        assert_eq!(msg.seq, 7);
        assert_eq!(
            store.load_next_msg("foo.missing", 1).await,
            Err(StorageError::EndOfStream)
        );
        assert_eq!(
            store.load_next_msg("foo.even", 10).await,
            Err(StorageError::EndOfStream)
        );
    }

    #[tokio::test]
    async fn test_fast_state_counters() {
        let store = MemoryStore::new(memory_config()).unwrap();
        for _ in 0..10 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }
        store.remove_msg(3).await.unwrap();
        store.remove_msg(7).await.unwrap();

        let mut fast = StreamState::default();
        store.fast_state(&mut fast).await;
        let full = store.state().await;

        assert_eq!(fast.messages, full.messages);
        assert_eq!(fast.bytes, full.bytes);
        assert_eq!(fast.first_seq, full.first_seq);
        assert_eq!(fast.last_seq, full.last_seq);
        assert_eq!(fast.num_subjects, full.num_subjects);
        assert_eq!(fast.num_deleted, full.num_deleted);
        assert!(fast.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_fast_state_floor_on_deletion_gap() {
        let store = MemoryStore::new(memory_config()).unwrap();
        for _ in 0..10 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }
        for seq in [2, 4, 6, 8] {
            store.remove_msg(seq).await.unwrap();
        }
        // Compacting to a removed sequence leaves the floor on a gap.
        store.compact(6).await.unwrap();

        let full = store.state().await;
        assert_eq!(full.first_seq, 6);
        assert_eq!(full.deleted, vec![8]);

        let mut fast = StreamState::default();
        store.fast_state(&mut fast).await;
        assert_eq!(fast.num_deleted, full.num_deleted);
    }

    #[tokio::test]
    async fn test_truncate_to_deletion_gap() {
        let store = MemoryStore::new(memory_config()).unwrap();
        for _ in 0..10 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }
        store.remove_msg(5).await.unwrap();
        store.truncate(5).await.unwrap();

        let state = store.state().await;
        assert_eq!(state.last_seq, 5);
        assert_eq!(state.messages, 4);
        assert_eq!(state.deleted, vec![5]);

        // The reported tail timestamp comes from the highest surviving
        // record, not the removed ones.
        let tail = store.load_msg(4).await.unwrap();
        assert_eq!(state.last_timestamp, tail.timestamp);

        let (seq, ts) = store
            .store_msg("foo", None, Bytes::from_static(b"ok"))
            .await
            .unwrap();
        assert_eq!(seq, 6);
        assert!(ts > tail.timestamp);
    }

    #[tokio::test]
    async fn test_empty_state_rules() {
        // Purge keeps sequence continuity.
        let store = MemoryStore::new(memory_config()).unwrap();
        for _ in 0..5 {
            store
                .store_msg("foo", None, Bytes::from_static(b"ok"))
                .await
                .unwrap();
        }
        store.purge().await.unwrap();
        let state = store.state().await;
        assert_eq!((state.first_seq, state.last_seq), (6, 5));

        // Truncate to zero resets the stream identity.
        store.truncate(0).await.unwrap();
        let state = store.state().await;
        assert_eq!((state.first_seq, state.last_seq), (0, 0));
        let (seq, _) = store
            .store_msg("foo", None, Bytes::from_static(b"ok"))
            .await
            .unwrap();
        assert_eq!(seq, 1);
    }
}
