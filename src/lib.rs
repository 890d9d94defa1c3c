//! A replicated key-value store whose consistency and availability
//! rest on a leader-based consensus protocol in the Raft family.
//!
//! The core lives in [`consensus`] (the role state machine, the
//! replicated log, and the client request router); [`replica`] drives
//! it with the single-threaded cooperative event loop described in the
//! concurrency model; [`transport`] is the datagram adapter the loop
//! talks through.

pub mod config;
pub mod consensus;
pub mod error;
pub mod log;
pub mod message;
pub mod replica;
pub mod state;
pub mod storage;
pub mod transport;

pub use config::ClusterConfig;
pub use message::{Body, Message, ReplicaId};
pub use replica::Replica;
pub use state::{ReplicaState, Role};
