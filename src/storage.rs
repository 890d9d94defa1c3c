//! Durability seam.
//!
//! This core keeps `term`, `voted_for`, and the log in volatile memory
//! only — spec.md §1 explicitly places disk persistence out of scope,
//! and §9 records it as an open question for any production
//! deployment. `Storage` exists so that seam is explicit rather than
//! absent: a caller that needs durability can supply their own
//! implementation without reshaping `Replica` or `consensus`. The only
//! implementation shipped here is a no-op.

use crate::log::Log;
use crate::message::ReplicaId;

/// Snapshot of the state that would need to survive a restart for
/// Election Safety and Log Matching to hold across crashes.
#[derive(Debug, Clone)]
pub struct PersistentState {
    pub term: u64,
    pub voted_for: Option<ReplicaId>,
    pub log: Log,
}

pub trait Storage: Send {
    fn load(&self) -> Option<PersistentState>;
    fn save(&mut self, state: &PersistentState);
}

/// Does not persist anything; `load` always returns `None`, so every
/// process start is a fresh, empty replica. This matches the source
/// system's actual behavior (state lives in memory only).
#[derive(Debug, Default)]
pub struct InMemoryStorage;

impl Storage for InMemoryStorage {
    fn load(&self) -> Option<PersistentState> {
        None
    }

    fn save(&mut self, _state: &PersistentState) {}
}
