//! The role dispatch table: term bookkeeping, elections, replication,
//! divergence repair, and client request routing.
//!
//! Every function here is a pure state transition — `&ClusterConfig`
//! plus `&mut ReplicaState` in, a list of outbound messages out. No
//! I/O happens in this module; `Replica::run` is the only place that
//! touches the network, which is what makes the rules below testable
//! without a transport at all.

use std::time::Instant;

use log::{debug, warn};

use crate::config::{ClusterConfig, CANDIDATE_ELECTION_TIMEOUT, REQUEST_QUEUE_CAPACITY};
use crate::log::LogEntry;
use crate::message::{Body, Message, ReplicaId, BROADCAST};
use crate::state::{ReplicaState, Role, UNKNOWN_LEADER};

/// The `hello` announced once at startup (§6).
pub fn startup(config: &ClusterConfig) -> Vec<Message> {
    vec![Message::new(config.id.clone(), BROADCAST, UNKNOWN_LEADER, Body::Hello)]
}

pub fn should_heartbeat(config: &ClusterConfig, state: &ReplicaState, now: Instant) -> bool {
    state.role == Role::Leader && now.duration_since(state.last_heartbeat) >= config.heartbeat_interval
}

pub fn should_start_election(state: &ReplicaState, now: Instant) -> bool {
    match state.role {
        Role::Follower => now.duration_since(state.last_activity) >= state.election_timeout,
        Role::Candidate => now.duration_since(state.last_activity) >= CANDIDATE_ELECTION_TIMEOUT,
        Role::Leader => false,
    }
}

/// Top-level role x message-kind dispatch (§9 design note). Handlers
/// not named for the current role are silent drops, with the single
/// exception the design note calls out: a vote request always at
/// least gets a chance to bump our term.
pub fn dispatch(config: &ClusterConfig, state: &mut ReplicaState, msg: Message) -> Vec<Message> {
    if msg.body.is_client_request() {
        return handle_client_request(config, state, msg);
    }

    match msg.body {
        Body::Hello => {
            debug!("{}: hello from {}", config.id, msg.src);
            vec![]
        }
        // ok/redirect/fail are replica -> client replies; a replica never receives them.
        Body::Ok { .. } | Body::Redirect { .. } | Body::Fail { .. } => vec![],
        Body::Get { .. } | Body::Put { .. } => unreachable!("routed above via is_client_request"),
        Body::Vote {
            term,
            candidate_id,
            last_log_index,
            last_log_term,
        } => vec![handle_vote_request(
            config,
            state,
            &msg.src,
            term,
            candidate_id,
            last_log_index,
            last_log_term,
        )],
        Body::VoteAck { term, vote_granted } => {
            // "Any: observed higher term" applies even if we're no longer a
            // Candidate, so step down first regardless of role; only the
            // tally itself is Candidate-only. A stale Leader/Candidate that
            // skips this would still demote on the next Append from the new
            // term's leader, but there's no reason to wait for that.
            maybe_step_down(state, term);
            if state.role == Role::Candidate {
                handle_vote_ack(config, state, &msg.src, term, vote_granted)
            } else {
                vec![]
            }
        }
        Body::Append {
            term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        } => handle_append(
            config,
            state,
            &msg.src,
            term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit,
        ),
        Body::Ack {
            term,
            success,
            confirmed_index,
        } => {
            // Same reasoning as the VoteAck arm above: step down on a higher
            // term even if we're no longer Leader before gating the rest of
            // the handler on role.
            maybe_step_down(state, term);
            if state.role == Role::Leader {
                handle_append_ack(config, state, &msg.src, term, success, confirmed_index)
            } else {
                vec![]
            }
        }
    }
}

/// Shared "observed higher term" rule (§4.1): bump term, clear
/// `voted_for`, and demote a Leader to Follower. Applies regardless of
/// which message carried the term.
fn maybe_step_down(state: &mut ReplicaState, observed_term: u64) {
    if observed_term > state.term {
        state.term = observed_term;
        state.voted_for = None;
        if state.role == Role::Leader {
            state.role = Role::Follower;
            state.assumed_leader = UNKNOWN_LEADER.to_string();
        }
    }
}

/// Start a new election (§4.1 "Start election").
pub fn start_election(config: &ClusterConfig, state: &mut ReplicaState, now: Instant) -> Vec<Message> {
    state.term += 1;
    state.voted_for = Some(config.id.clone());
    state.role = Role::Candidate;
    state.assumed_leader = UNKNOWN_LEADER.to_string();
    state.request_queue.clear();
    state.votes_for_me = 1;
    state.votes_total = 1;
    state.last_activity = now;
    state.reset_election_timeout(config);

    let (last_log_term, last_log_index) = state.last_log_term_and_index();
    config
        .peers
        .iter()
        .map(|peer| {
            Message::new(
                config.id.clone(),
                peer.clone(),
                state.assumed_leader.clone(),
                Body::Vote {
                    term: state.term,
                    candidate_id: config.id.clone(),
                    last_log_index,
                    last_log_term,
                },
            )
        })
        .collect()
}

/// Grant-vote rule (§4.1).
fn handle_vote_request(
    config: &ClusterConfig,
    state: &mut ReplicaState,
    src: &str,
    term: u64,
    candidate_id: ReplicaId,
    last_log_index: i64,
    last_log_term: u64,
) -> Message {
    maybe_step_down(state, term);

    let mut granted = false;
    if term >= state.term {
        let (my_last_term, my_last_index) = state.last_log_term_and_index();
        let already_voted_elsewhere = matches!(&state.voted_for, Some(v) if v != &candidate_id);
        let log_up_to_date = (last_log_term, last_log_index) >= (my_last_term, my_last_index);
        if !already_voted_elsewhere && log_up_to_date {
            state.voted_for = Some(candidate_id.clone());
            state.last_activity = Instant::now();
            granted = true;
        }
    }

    Message::new(
        config.id.clone(),
        src.to_string(),
        state.assumed_leader.clone(),
        Body::VoteAck {
            term: state.term,
            vote_granted: granted,
        },
    )
}

/// Vote-ack handling, Candidate only (§4.1).
fn handle_vote_ack(config: &ClusterConfig, state: &mut ReplicaState, src: &str, term: u64, granted: bool) -> Vec<Message> {
    maybe_step_down(state, term);
    if state.role != Role::Candidate {
        return vec![];
    }

    state.votes_total += 1;
    if granted {
        state.votes_for_me += 1;
        debug!("{}: vote from {} ({}/{})", config.id, src, state.votes_for_me, config.majority());
    }

    if state.votes_for_me >= config.majority() {
        become_leader(config, state)
    } else {
        vec![]
    }
}

/// A Candidate crossing the majority threshold becomes Leader (§4.1).
fn become_leader(config: &ClusterConfig, state: &mut ReplicaState) -> Vec<Message> {
    state.role = Role::Leader;
    state.assumed_leader = config.id.clone();
    for peer in &config.peers {
        state.match_index.insert(peer.clone(), state.commit_index);
    }
    state.pending_puts.clear();

    let mut out = flush_queue(config, state);
    out.extend(heartbeat_broadcast(config, state));
    out
}

/// Append handling for a Follower or Candidate (§4.3). Written to also
/// cover a Leader receiving a same-or-higher-term Append, which is
/// exactly the "Leader: observed higher term in any message ->
/// Follower" row from §4.1's transition table.
#[allow(clippy::too_many_arguments)]
fn handle_append(
    config: &ClusterConfig,
    state: &mut ReplicaState,
    src: &str,
    term: u64,
    prev_log_index: i64,
    prev_log_term: u64,
    entries: Vec<LogEntry>,
    leader_commit: i64,
) -> Vec<Message> {
    state.last_activity = Instant::now();
    let term_ok = term >= state.term;

    let mut out = Vec::new();
    if term_ok {
        state.assumed_leader = src.to_string();
        state.term = term;
        state.role = Role::Follower;
        state.voted_for = None;
        out.extend(flush_queue(config, state));
    }

    // Followers commit entries they already hold even before the log
    // below is updated — safe because leader_commit never names an
    // index the follower hasn't received yet.
    if leader_commit > state.commit_index {
        let target = leader_commit.min(state.log.last_index());
        if target > state.commit_index {
            apply_committed(state, target);
        }
    }

    if entries.is_empty() {
        // Heartbeat: no reconciliation to do, and per §4.3 step 4 we
        // stop here without an Ack.
        return out;
    }

    let success = term_ok
        && (prev_log_index == -1
            || (state.log.in_bounds(prev_log_index) && state.log.term_at(prev_log_index) == Some(prev_log_term)));

    if success {
        state.log.reconcile(prev_log_index + 1, &entries);
    }

    out.push(Message::new(
        config.id.clone(),
        src.to_string(),
        state.assumed_leader.clone(),
        Body::Ack {
            term: state.term,
            success,
            confirmed_index: state.log.last_index(),
        },
    ));
    out
}

/// Append-ack handling, Leader only (§4.2).
fn handle_append_ack(
    config: &ClusterConfig,
    state: &mut ReplicaState,
    src: &str,
    term: u64,
    success: bool,
    confirmed_index: i64,
) -> Vec<Message> {
    maybe_step_down(state, term);
    if state.role != Role::Leader {
        return vec![];
    }

    if (state.log.len() as i64) <= confirmed_index {
        // The follower claims to hold more log than we do: this ack
        // belongs to a later term we've since lost track of.
        state.role = Role::Follower;
        state.assumed_leader = UNKNOWN_LEADER.to_string();
        return vec![];
    }

    let mut out = Vec::new();
    if success {
        state.match_index.insert(src.to_string(), confirmed_index);

        let replicated_count = 1 + state
            .match_index
            .values()
            .filter(|&&matched| matched >= confirmed_index)
            .count();
        let entry_is_current_term = state.log.term_at(confirmed_index) == Some(state.term);

        if replicated_count >= config.majority() && entry_is_current_term && confirmed_index > state.commit_index {
            let applied = apply_committed(state, confirmed_index);
            for entry in &applied {
                if let Some(answered) = state.pending_puts.get_mut(&entry.mid) {
                    if !*answered {
                        *answered = true;
                        out.push(Message::new(
                            config.id.clone(),
                            entry.putter.clone(),
                            state.assumed_leader.clone(),
                            Body::Ok {
                                mid: entry.mid.clone(),
                                value: None,
                            },
                        ));
                    }
                }
            }
            out.extend(heartbeat_broadcast(config, state));
        }
    } else {
        let current = *state.match_index.get(src).unwrap_or(&-1);
        state.match_index.insert(src.to_string(), (current - 1).max(-1));
        out.push(append_for_peer(config, state, src));
    }
    out
}

/// Apply entries `(commit_index, new_commit_index]` to `values`,
/// advance `commit_index`, and return the entries just applied.
fn apply_committed(state: &mut ReplicaState, new_commit_index: i64) -> Vec<LogEntry> {
    let mut applied = Vec::new();
    let mut idx = state.commit_index + 1;
    while idx <= new_commit_index {
        if let Some(entry) = state.log.get(idx) {
            let entry = entry.clone();
            state.values.insert(entry.key.clone(), entry.value.clone());
            applied.push(entry);
        }
        idx += 1;
    }
    state.commit_index = new_commit_index;
    applied
}

/// Build the Append a Leader should send `peer`, anchored at that
/// peer's current `match_index` (§4.2 "Append RPC structure").
fn append_for_peer(config: &ClusterConfig, state: &ReplicaState, peer: &str) -> Message {
    let prev_log_index = *state.match_index.get(peer).unwrap_or(&state.commit_index);
    let prev_log_term = state.log.term_at(prev_log_index).unwrap_or(state.term);
    let entries = state.log.suffix_from(prev_log_index + 1).to_vec();
    Message::new(
        config.id.clone(),
        peer.to_string(),
        state.assumed_leader.clone(),
        Body::Append {
            term: state.term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: state.commit_index,
        },
    )
}

/// An Append with empty `entries`, used for periodic heartbeats and to
/// propagate a freshly advanced commit index (§4.2).
fn heartbeat_for_peer(config: &ClusterConfig, state: &ReplicaState, peer: &str) -> Message {
    let prev_log_index = *state.match_index.get(peer).unwrap_or(&state.commit_index);
    let prev_log_term = state.log.term_at(prev_log_index).unwrap_or(state.term);
    Message::new(
        config.id.clone(),
        peer.to_string(),
        state.assumed_leader.clone(),
        Body::Append {
            term: state.term,
            prev_log_index,
            prev_log_term,
            entries: Vec::new(),
            leader_commit: state.commit_index,
        },
    )
}

pub fn heartbeat_broadcast(config: &ClusterConfig, state: &mut ReplicaState) -> Vec<Message> {
    state.last_heartbeat = Instant::now();
    config.peers.iter().map(|peer| heartbeat_for_peer(config, state, peer)).collect()
}

fn mid_of(body: &Body) -> &str {
    match body {
        Body::Get { mid, .. } | Body::Put { mid, .. } => mid.as_str(),
        _ => "",
    }
}

/// §4.4 client request routing.
fn handle_client_request(config: &ClusterConfig, state: &mut ReplicaState, msg: Message) -> Vec<Message> {
    if state.role == Role::Leader {
        return match msg.body {
            Body::Get { key, mid } => vec![handle_get_as_leader(config, state, &msg.src, key, mid)],
            Body::Put { key, value, mid } => handle_put_as_leader(config, state, &msg.src, key, value, mid),
            _ => vec![],
        };
    }

    if state.assumed_leader != UNKNOWN_LEADER {
        let mid = mid_of(&msg.body).to_string();
        return vec![redirect(config, state, &msg.src, mid)];
    }

    enqueue_or_fail(config, state, msg)
}

fn handle_get_as_leader(config: &ClusterConfig, state: &ReplicaState, src: &str, key: String, mid: String) -> Message {
    let value = state.values.get(&key).cloned().unwrap_or_default();
    Message::new(
        config.id.clone(),
        src.to_string(),
        state.assumed_leader.clone(),
        Body::Ok { mid, value: Some(value) },
    )
}

fn handle_put_as_leader(
    config: &ClusterConfig,
    state: &mut ReplicaState,
    src: &str,
    key: String,
    value: String,
    mid: String,
) -> Vec<Message> {
    let entry = LogEntry {
        term: state.term,
        key,
        value,
        mid: mid.clone(),
        putter: src.to_string(),
    };
    state.log.append(entry);
    state.pending_puts.insert(mid, false);
    config.peers.iter().map(|peer| append_for_peer(config, state, peer)).collect()
}

fn redirect(config: &ClusterConfig, state: &ReplicaState, src: &str, mid: String) -> Message {
    Message::new(config.id.clone(), src.to_string(), state.assumed_leader.clone(), Body::Redirect { mid })
}

fn enqueue_or_fail(config: &ClusterConfig, state: &mut ReplicaState, msg: Message) -> Vec<Message> {
    if state.request_queue.len() >= REQUEST_QUEUE_CAPACITY {
        let mid = mid_of(&msg.body).to_string();
        warn!("{}: request_queue full, failing mid={}", config.id, mid);
        vec![Message::new(config.id.clone(), msg.src.clone(), state.assumed_leader.clone(), Body::Fail { mid })]
    } else {
        state.request_queue.push_back(msg);
        vec![]
    }
}

/// Re-dispatch every deferred message through the normal client
/// pipeline, because the role may have changed since it was queued
/// (§9 design note).
fn flush_queue(config: &ClusterConfig, state: &mut ReplicaState) -> Vec<Message> {
    let queued: Vec<Message> = state.request_queue.drain(..).collect();
    queued.into_iter().flat_map(|msg| handle_client_request(config, state, msg)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;

    fn cluster(id: &str, peers: &[&str]) -> ClusterConfig {
        ClusterConfig::new(id.to_string(), peers.iter().map(|p| p.to_string()).collect())
    }

    fn elect_leader(config: &ClusterConfig, state: &mut ReplicaState, peers: &[&str]) {
        start_election(config, state, Instant::now());
        for peer in peers {
            handle_vote_ack(config, state, peer, state.term, true);
        }
        assert_eq!(state.role, Role::Leader);
    }

    #[test]
    fn election_grants_majority_becomes_leader() {
        let config = cluster("r1", &["r2", "r3"]);
        let mut state = ReplicaState::new(&config);
        let out = start_election(&config, &mut state, Instant::now());
        assert_eq!(out.len(), 2);
        assert_eq!(state.role, Role::Candidate);
        assert_eq!(state.votes_for_me, 1); // self-vote

        // self (1) + one peer grant already forms a majority of three.
        let out = handle_vote_ack(&config, &mut state, "r2", state.term, true);
        assert_eq!(state.role, Role::Leader);
        // becoming leader flushes the (empty) queue and broadcasts heartbeats
        assert_eq!(out.len(), 2);

        // a duplicated/late ack from the other peer is harmless.
        let out = handle_vote_ack(&config, &mut state, "r3", state.term, true);
        assert!(out.is_empty());
    }

    #[test]
    fn vote_denied_to_second_candidate_same_term() {
        let config = cluster("r1", &["r2", "r3"]);
        let mut state = ReplicaState::new(&config);
        let ack1 = handle_vote_request(&config, &mut state, "r2", 1, "r2".to_string(), -1, 0);
        assert!(matches!(ack1.body, Body::VoteAck { vote_granted: true, .. }));

        let ack2 = handle_vote_request(&config, &mut state, "r3", 1, "r3".to_string(), -1, 0);
        assert!(matches!(ack2.body, Body::VoteAck { vote_granted: false, .. }));
    }

    #[test]
    fn put_on_leader_defers_reply_until_commit() {
        let config = cluster("r1", &["r2", "r3"]);
        let mut state = ReplicaState::new(&config);
        elect_leader(&config, &mut state, &["r2", "r3"]);

        let put = Message::new("c1", "r1", "r1", Body::Put { key: "x".into(), value: "1".into(), mid: "m1".into() });
        let out = handle_client_request(&config, &mut state, put);
        // appended + replicated to both peers, no client reply yet
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| matches!(m.body, Body::Append { .. })));
        assert_eq!(state.commit_index, -1);

        // leader (1) + one acking peer already forms a majority of three.
        let out = handle_append_ack(&config, &mut state, "r2", state.term, true, 0);
        assert_eq!(state.commit_index, 0);
        assert_eq!(state.values.get("x"), Some(&"1".to_string()));
        assert!(out.iter().any(|m| matches!(&m.body, Body::Ok{mid,..} if mid == "m1")));

        // the second peer's ack must not answer the same mid twice.
        let out = handle_append_ack(&config, &mut state, "r3", state.term, true, 0);
        assert!(!out.iter().any(|m| matches!(&m.body, Body::Ok{..})));
    }

    #[test]
    fn get_on_follower_with_known_leader_redirects() {
        let config = cluster("r2", &["r1", "r3"]);
        let mut state = ReplicaState::new(&config);
        state.assumed_leader = "r1".to_string();

        let get = Message::new("c1", "r2", "unknown", Body::Get { key: "x".into(), mid: "m2".into() });
        let out = handle_client_request(&config, &mut state, get);
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0].body, Body::Redirect{mid} if mid == "m2"));
        assert_eq!(out[0].leader, "r1");
    }

    #[test]
    fn duplicate_put_with_same_mid_commits_both_entries_but_answers_once() {
        // S6: the protocol does not de-dup PUTs by mid (§5, §8 S6). A
        // client retrying the same put{mid=m1} twice appends two log
        // entries, both of which commit. `pending_puts` is keyed by mid
        // (§4.2's "ack accounting" resolution), so the second entry finds
        // its mid already answered and stays silent — one of the two
        // ok{mid} responses §8 S6 calls "permissible" is what this core
        // actually produces. Either way, the final value is the one put.
        let config = cluster("r1", &["r2", "r3"]);
        let mut state = ReplicaState::new(&config);
        elect_leader(&config, &mut state, &["r2", "r3"]);

        let put = || Message::new("c1", "r1", "r1", Body::Put { key: "x".into(), value: "1".into(), mid: "m1".into() });
        handle_client_request(&config, &mut state, put());
        handle_client_request(&config, &mut state, put());
        assert_eq!(state.log.suffix_from(0).len(), 2);

        let out = handle_append_ack(&config, &mut state, "r2", state.term, true, 1);
        assert_eq!(state.commit_index, 1);
        assert_eq!(state.values.get("x"), Some(&"1".to_string()));
        let ok_count = out.iter().filter(|m| matches!(&m.body, Body::Ok { mid, .. } if mid == "m1")).count();
        assert_eq!(ok_count, 1);
    }

    #[test]
    fn starting_an_election_clears_the_deferred_queue() {
        // §4.1 "Start election" explicitly clears request_queue: a replica
        // that defers a request and then times out itself drops it rather
        // than carrying it into the new term. Clients retry on timeout
        // (§1 Non-goals), so this is safe, just worth pinning down.
        let config = cluster("r3", &["r1", "r2"]);
        let mut state = ReplicaState::new(&config);

        let put = Message::new("c1", "r3", "unknown", Body::Put { key: "x".into(), value: "1".into(), mid: "m3".into() });
        let out = handle_client_request(&config, &mut state, put);
        assert!(out.is_empty());
        assert_eq!(state.request_queue.len(), 1);

        start_election(&config, &mut state, Instant::now());
        assert!(state.request_queue.is_empty());
    }

    #[test]
    fn accepting_a_new_leader_flushes_the_deferred_queue() {
        let config = cluster("r3", &["r1", "r2"]);
        let mut state = ReplicaState::new(&config);

        let put = Message::new("c1", "r3", "unknown", Body::Put { key: "x".into(), value: "1".into(), mid: "m3".into() });
        let out = handle_client_request(&config, &mut state, put);
        assert!(out.is_empty());
        assert_eq!(state.request_queue.len(), 1);

        // r1 establishes itself as leader via a heartbeat Append; r3 adopts
        // it and, per §4.3 step 2, flushes its deferred queue.
        let out = handle_append(&config, &mut state, "r1", 1, -1, 0, Vec::new(), -1);
        assert!(state.request_queue.is_empty());
        assert!(out.iter().any(|m| matches!(&m.body, Body::Redirect{mid} if mid == "m3")));
    }

    #[test]
    fn append_is_idempotent_beyond_last_activity() {
        let config = cluster("r2", &["r1", "r3"]);
        let mut state = ReplicaState::new(&config);
        let entries = vec![LogEntry {
            term: 1,
            key: "x".into(),
            value: "1".into(),
            mid: "m1".into(),
            putter: "c1".into(),
        }];
        let out1 = handle_append(&config, &mut state, "r1", 1, -1, 0, entries.clone(), -1);
        let commit_before = state.commit_index;
        let log_before = state.log.suffix_from(0).to_vec();

        let out2 = handle_append(&config, &mut state, "r1", 1, -1, 0, entries, -1);
        assert_eq!(state.commit_index, commit_before);
        assert_eq!(state.log.suffix_from(0).to_vec(), log_before);
        assert_eq!(out1.len(), out2.len());
    }

    #[test]
    fn divergent_follower_log_is_repaired() {
        let config = cluster("r1", &["r2"]);
        let mut state = ReplicaState::new(&config);
        state.role = Role::Leader;
        state.term = 2;
        state.assumed_leader = "r1".to_string();
        state.log.append(LogEntry { term: 1, key: "a".into(), value: "1".into(), mid: "m1".into(), putter: "c1".into() });
        state.log.append(LogEntry { term: 2, key: "b".into(), value: "2".into(), mid: "m2".into(), putter: "c1".into() });

        // r2 is actually one entry behind and diverged; leader learns via a failed ack.
        state.match_index.insert("r2".to_string(), 0);
        let out = handle_append_ack(&config, &mut state, "r2", 2, false, 0);
        assert_eq!(state.match_index["r2"], -1);
        assert_eq!(out.len(), 1);
        if let Body::Append { prev_log_index, entries, .. } = &out[0].body {
            assert_eq!(*prev_log_index, -1);
            assert_eq!(entries.len(), 2);
        } else {
            panic!("expected an Append retry");
        }
    }
}
