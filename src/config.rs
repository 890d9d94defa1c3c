use std::time::Duration;

use clap::Parser;

use crate::message::ReplicaId;

/// Default heartbeat period (§5: "0.25 s").
pub const DEFAULT_HEARTBEAT_MS: u64 = 250;
/// Default randomized election timeout range (§5: "0.5-1.0 s").
pub const DEFAULT_ELECTION_TIMEOUT_MIN_MS: u64 = 500;
pub const DEFAULT_ELECTION_TIMEOUT_MAX_MS: u64 = 1000;
/// Fixed candidate re-election timeout (§4.1: "≈1 s").
pub const CANDIDATE_ELECTION_TIMEOUT: Duration = Duration::from_millis(1000);
/// How long the event loop blocks waiting for a datagram before
/// re-checking its timers (§5 step 3: "~0.5 s").
pub const RECV_POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Bound on the deferred client request queue (SPEC_FULL.md §3).
pub const REQUEST_QUEUE_CAPACITY: usize = 1024;

/// `port id peer [peer ...]`, per §6.
#[derive(Debug, Parser)]
#[command(name = "raftkv-server", version, about = "A replicated key-value store replica")]
pub struct Cli {
    /// UDP port this replica listens on.
    pub port: u16,

    /// This replica's id.
    pub id: ReplicaId,

    /// The ids of every other replica in the cluster.
    #[arg(required = true, num_args = 1..)]
    pub peers: Vec<ReplicaId>,

    /// Heartbeat interval in milliseconds, for a leader.
    #[arg(long, default_value_t = DEFAULT_HEARTBEAT_MS)]
    pub heartbeat_ms: u64,

    /// Minimum randomized election timeout, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_ELECTION_TIMEOUT_MIN_MS)]
    pub election_timeout_min_ms: u64,

    /// Maximum randomized election timeout, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_ELECTION_TIMEOUT_MAX_MS)]
    pub election_timeout_max_ms: u64,
}

/// Immutable, cluster-wide configuration known to a replica at startup.
/// Never mutates for the life of the process (no membership changes).
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub id: ReplicaId,
    pub peers: Vec<ReplicaId>,
    pub heartbeat_interval: Duration,
    pub election_timeout_range: (Duration, Duration),
}

impl ClusterConfig {
    pub fn new(id: ReplicaId, peers: Vec<ReplicaId>) -> Self {
        Self {
            id,
            peers,
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_MS),
            election_timeout_range: (
                Duration::from_millis(DEFAULT_ELECTION_TIMEOUT_MIN_MS),
                Duration::from_millis(DEFAULT_ELECTION_TIMEOUT_MAX_MS),
            ),
        }
    }

    /// Cluster size including self. A strict majority is
    /// `cluster_size() / 2 + 1`.
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    pub fn majority(&self) -> usize {
        self.cluster_size() / 2 + 1
    }
}

impl From<&Cli> for ClusterConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            id: cli.id.clone(),
            peers: cli.peers.clone(),
            heartbeat_interval: Duration::from_millis(cli.heartbeat_ms),
            election_timeout_range: (
                Duration::from_millis(cli.election_timeout_min_ms),
                Duration::from_millis(cli.election_timeout_max_ms),
            ),
        }
    }
}
