use serde::{Deserialize, Serialize};

use crate::message::ReplicaId;

/// A single entry in a replica's log.
///
/// Immutable once committed. Equality for divergence checks is defined
/// over `(term, key, value)` only — `mid` and `putter` identify who to
/// reply to and do not participate in the Log Matching comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub term: u64,
    pub key: String,
    pub value: String,
    #[serde(rename = "MID")]
    pub mid: String,
    pub putter: ReplicaId,
}

impl LogEntry {
    /// Divergence-check equality: `(term, key, value)` only.
    fn matches(&self, other: &LogEntry) -> bool {
        self.term == other.term && self.key == other.key && self.value == other.value
    }
}

/// Ordered, zero-indexed, append-mostly sequence of [`LogEntry`].
///
/// Indices are signed (`i64`) because an empty log, "no previous
/// entry", and "nothing committed yet" are all represented as `-1`
/// throughout the protocol (see `commit_index`, `prev_log_index`).
#[derive(Debug, Default, Clone)]
pub struct Log {
    entries: Vec<LogEntry>,
}

impl Log {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `len(log) - 1`, i.e. `-1` for an empty log.
    pub fn last_index(&self) -> i64 {
        self.entries.len() as i64 - 1
    }

    pub fn term_at(&self, index: i64) -> Option<u64> {
        if index < 0 {
            return None;
        }
        self.entries.get(index as usize).map(|e| e.term)
    }

    pub fn get(&self, index: i64) -> Option<&LogEntry> {
        if index < 0 {
            return None;
        }
        self.entries.get(index as usize)
    }

    pub fn in_bounds(&self, index: i64) -> bool {
        index >= 0 && (index as usize) < self.entries.len()
    }

    /// A leader only ever appends; it never overwrites an entry of its
    /// own log (Leader Append-Only).
    pub fn append(&mut self, entry: LogEntry) -> i64 {
        self.entries.push(entry);
        self.last_index()
    }

    /// Suffix starting at `max(index, 0)`; empty if `index` runs past
    /// the end of the log.
    pub fn suffix_from(&self, index: i64) -> &[LogEntry] {
        let start = index.max(0) as usize;
        if start >= self.entries.len() {
            &[]
        } else {
            &self.entries[start..]
        }
    }

    /// Reconcile the log against a suffix of entries received in an
    /// Append whose `prev_log_index` matched, per §4.3 step 6: scan
    /// entry by entry, and at the first index where the local log is
    /// shorter than `offset` or the existing entry diverges, truncate
    /// and splice in the remainder. Entries that already match are
    /// left untouched so replaying the same Append is a no-op.
    pub fn reconcile(&mut self, offset: i64, new_entries: &[LogEntry]) {
        let mut idx = offset.max(0) as usize;
        for entry in new_entries {
            match self.entries.get(idx) {
                Some(existing) if existing.matches(entry) => {}
                Some(_) => {
                    self.entries.truncate(idx);
                    self.entries.push(entry.clone());
                }
                None => {
                    self.entries.push(entry.clone());
                }
            }
            idx += 1;
        }
    }
}
