use serde::{Deserialize, Serialize};

use crate::log::LogEntry;

pub type ReplicaId = String;

/// The well-known destination id meaning "every replica in the cluster".
pub const BROADCAST: &str = "FFFF";

/// One datagram, one JSON object, per §6: a common envelope (`src`,
/// `dst`, `leader`) wrapping a tagged, type-specific body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub src: ReplicaId,
    pub dst: ReplicaId,
    pub leader: ReplicaId,
    #[serde(flatten)]
    pub body: Body,
}

impl Message {
    pub fn new(src: impl Into<ReplicaId>, dst: impl Into<ReplicaId>, leader: impl Into<ReplicaId>, body: Body) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            leader: leader.into(),
            body,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.body.kind()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Body {
    /// Announced once at startup, broadcast, no reply expected.
    Hello,

    Get {
        key: String,
        #[serde(rename = "MID")]
        mid: String,
    },

    Put {
        key: String,
        value: String,
        #[serde(rename = "MID")]
        mid: String,
    },

    Ok {
        #[serde(rename = "MID")]
        mid: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        value: Option<String>,
    },

    Redirect {
        #[serde(rename = "MID")]
        mid: String,
    },

    /// Reserved per §6; this core never emits it on the happy path —
    /// only when a replica's deferred-request queue overflows (§4.4 of
    /// SPEC_FULL.md).
    Fail {
        #[serde(rename = "MID")]
        mid: String,
    },

    #[serde(rename = "vote")]
    Vote {
        term: u64,
        #[serde(rename = "candidateId")]
        candidate_id: ReplicaId,
        #[serde(rename = "lastLogIndex")]
        last_log_index: i64,
        #[serde(rename = "lastLogTerm")]
        last_log_term: u64,
    },

    #[serde(rename = "vote ack")]
    VoteAck {
        term: u64,
        #[serde(rename = "voteGranted")]
        vote_granted: bool,
    },

    Append {
        term: u64,
        prev_log_index: i64,
        prev_log_term: u64,
        entries: Vec<LogEntry>,
        leader_commit: i64,
    },

    Ack {
        term: u64,
        success: bool,
        confirmed_index: i64,
    },
}

impl Body {
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Hello => "hello",
            Body::Get { .. } => "get",
            Body::Put { .. } => "put",
            Body::Ok { .. } => "ok",
            Body::Redirect { .. } => "redirect",
            Body::Fail { .. } => "fail",
            Body::Vote { .. } => "vote",
            Body::VoteAck { .. } => "vote ack",
            Body::Append { .. } => "append",
            Body::Ack { .. } => "ack",
        }
    }

    /// A client-originated request, as opposed to a reply or an
    /// inter-replica consensus message. `dispatch` routes on this before
    /// looking at role, so it's the single gate deciding whether a message
    /// can ever reach the deferred `request_queue`.
    pub fn is_client_request(&self) -> bool {
        matches!(self, Body::Get { .. } | Body::Put { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let msg = Message::new(
            "0000",
            "0001",
            "0000",
            Body::Put {
                key: "x".into(),
                value: "1".into(),
                mid: "m1".into(),
            },
        );
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"type\":\"put\""));
        assert!(encoded.contains("\"MID\":\"m1\""));
        let decoded: Message = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.kind(), "put");
    }

    #[test]
    fn vote_ack_uses_spaced_type_tag() {
        let msg = Message::new(
            "0001",
            "0000",
            "unknown",
            Body::VoteAck { term: 3, vote_granted: true },
        );
        let encoded = serde_json::to_string(&msg).unwrap();
        assert!(encoded.contains("\"type\":\"vote ack\""));
    }
}
