//! Per-subject sequence index.
//!
//! Tracks, for every subject with stored messages, the ordered set of
//! sequences carrying it. Summary queries (count, first/last sequence) and
//! the retention engine's "oldest sequence for subject" lookup all come
//! from these sets, so the index is updated on every mutation of the log.

use std::collections::{BTreeSet, HashMap};

use rill_storage::{SubjectState, subject};

#[derive(Debug, Default)]
pub(crate) struct SubjectIndex {
    subjects: HashMap<String, BTreeSet<u64>>,
}

impl SubjectIndex {
    /// Record that `seq` carries `subj`.
    pub fn insert(&mut self, subj: &str, seq: u64) {
        self.subjects.entry(subj.to_string()).or_default().insert(seq);
    }

    /// Forget that `seq` carried `subj`, dropping the subject entirely when
    /// no sequences remain.
    pub fn remove(&mut self, subj: &str, seq: u64) {
        if let Some(seqs) = self.subjects.get_mut(subj) {
            seqs.remove(&seq);
            if seqs.is_empty() {
                self.subjects.remove(subj);
            }
        }
    }

    /// Oldest sequence carrying the subject.
    pub fn first_seq(&self, subj: &str) -> Option<u64> {
        self.subjects.get(subj).and_then(|seqs| seqs.first().copied())
    }

    /// First sequence at or above `start` carrying the subject.
    pub fn next_seq(&self, subj: &str, start: u64) -> Option<u64> {
        self.subjects
            .get(subj)
            .and_then(|seqs| seqs.range(start..).next().copied())
    }

    /// Number of messages stored under the subject.
    pub fn count(&self, subj: &str) -> u64 {
        self.subjects.get(subj).map_or(0, |seqs| seqs.len() as u64)
    }

    /// Number of distinct subjects.
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn clear(&mut self) {
        self.subjects.clear();
    }

    /// Subjects whose message count exceeds `limit`.
    pub fn over_limit(&self, limit: u64) -> Vec<String> {
        self.subjects
            .iter()
            .filter(|(_, seqs)| seqs.len() as u64 > limit)
            .map(|(subj, _)| subj.clone())
            .collect()
    }

    /// All sequences at or above `start` whose subject matches the pattern,
    /// ascending. An empty pattern matches every subject.
    pub fn matching_seqs(&self, pattern: &str, start: u64) -> Vec<u64> {
        let mut seqs: Vec<u64> = self
            .subjects
            .iter()
            .filter(|(subj, _)| pattern.is_empty() || subject::matches_pattern(subj, pattern))
            .flat_map(|(_, seqs)| seqs.range(start..).copied())
            .collect();
        seqs.sort_unstable();
        seqs
    }

    /// Per-subject summaries for subjects matching the pattern. An empty
    /// pattern matches every subject.
    pub fn subjects_state(&self, pattern: &str) -> HashMap<String, SubjectState> {
        self.subjects
            .iter()
            .filter(|(subj, _)| pattern.is_empty() || subject::matches_pattern(subj, pattern))
            .filter_map(|(subj, seqs)| {
                let first = seqs.first().copied()?;
                let last = seqs.last().copied()?;
                Some((
                    subj.clone(),
                    SubjectState {
                        messages: seqs.len() as u64,
                        first_seq: first,
                        last_seq: last,
                    },
                ))
            })
            .collect()
    }
}
