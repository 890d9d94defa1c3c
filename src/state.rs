use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::config::ClusterConfig;
use crate::log::Log;
use crate::message::{Message, ReplicaId};

pub const UNKNOWN_LEADER: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

/// Everything a replica knows about the consensus protocol and its own
/// log, minus the cluster-wide config (`ClusterConfig`), which never
/// changes and is passed alongside this struct instead of living
/// inside it.
pub struct ReplicaState {
    pub role: Role,
    pub term: u64,
    pub voted_for: Option<ReplicaId>,
    pub assumed_leader: ReplicaId,
    pub commit_index: i64,
    pub log: Log,
    pub values: HashMap<String, String>,

    /// Leader-only: highest log index known replicated on each peer.
    pub match_index: HashMap<ReplicaId, i64>,
    /// Leader-only: has this in-flight PUT been answered yet.
    pub pending_puts: HashMap<String, bool>,

    /// Client messages deferred while the leader is unknown. Bounded;
    /// see `REQUEST_QUEUE_CAPACITY`.
    pub request_queue: VecDeque<Message>,

    /// Candidate-only vote tally.
    pub votes_for_me: usize,
    pub votes_total: usize,

    pub last_activity: Instant,
    pub last_heartbeat: Instant,
    pub election_timeout: Duration,
}

impl ReplicaState {
    pub fn new(config: &ClusterConfig) -> Self {
        let now = Instant::now();
        Self {
            role: Role::Follower,
            term: 0,
            voted_for: None,
            assumed_leader: UNKNOWN_LEADER.to_string(),
            commit_index: -1,
            log: Log::new(),
            values: HashMap::new(),
            match_index: HashMap::new(),
            pending_puts: HashMap::new(),
            request_queue: VecDeque::new(),
            votes_for_me: 0,
            votes_total: 0,
            last_activity: now,
            last_heartbeat: now,
            election_timeout: random_election_timeout(config),
        }
    }

    pub fn reset_election_timeout(&mut self, config: &ClusterConfig) {
        self.election_timeout = random_election_timeout(config);
    }

    /// `(last_log_term, last_log_index)`, compared lexicographically
    /// when deciding whether to grant a vote (SPEC_FULL.md §4.2).
    pub fn last_log_term_and_index(&self) -> (u64, i64) {
        let index = self.log.last_index();
        let term = self.log.term_at(index).unwrap_or(self.term);
        (term, index)
    }
}

fn random_election_timeout(config: &ClusterConfig) -> Duration {
    let (min, max) = config.election_timeout_range;
    if max <= min {
        return min;
    }
    let min_ms = min.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let ms = rand::thread_rng().gen_range(min_ms..=max_ms);
    Duration::from_millis(ms)
}
