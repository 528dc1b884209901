//! transport.rs
//!
//! Outbound port used by the protocol engines to reach their peers, plus a
//! cooperative in-process implementation. Inbound traffic is delivered by
//! whoever owns the wire, through the engines' public `handle_*` methods.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use council_common::{BallotBox, CouncilError, NodeId, Proposal, Vote};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("peer {0} is unreachable")]
    Unreachable(NodeId),

}

impl From<TransportError> for CouncilError {
    fn from(err: TransportError) -> Self {
        CouncilError::Transport(err.to_string())
    }
}

/// One replicated log slot of the leader-replication engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub proposal_id: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouncilMessage {
    RequestVote {
        term: u64,
        candidate: NodeId,
        last_log_index: u64,
        last_log_term: u64,
    },
    AppendEntries {
        term: u64,
        leader: NodeId,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    },
    PrePrepare {
        view: u64,
        sequence: u64,
        digest: String,
        proposal: Proposal,
    },
    GossipDigest {
        proposal_id: String,
        votes: BallotBox<Vote>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CouncilReply {
    Vote { term: u64, granted: bool },
    Append { term: u64, success: bool },
    PrePrepareAck { view: u64, accepted: bool },
    Digest { proposal_id: String, votes: BallotBox<Vote> },
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `message` from `from` to `to` and waits for the peer's reply.
    async fn request(
        &self,
        from: &NodeId,
        to: &NodeId,
        message: CouncilMessage,
    ) -> Result<CouncilReply, TransportError>;
}

#[derive(Debug, Default)]
struct PeerState {
    term: u64,
    voted_for: Option<NodeId>,
    last_index: u64,
    view: u64,
}

/// In-process transport whose peers answer cooperatively.
///
/// Each simulated peer grants at most one vote per term, follows the highest
/// term it has seen and acknowledges every append or pre-prepare that is not
/// stale. Isolated peers can neither send nor receive.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    peers: Mutex<HashMap<NodeId, PeerState>>,
    isolated: Mutex<HashSet<NodeId>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cuts `peer` off from everyone until `heal` is called.
    pub async fn isolate(&self, peer: &NodeId) {
        self.isolated.lock().await.insert(peer.clone());
    }

    pub async fn heal(&self, peer: &NodeId) {
        self.isolated.lock().await.remove(peer);
    }

    /// Highest term the simulated peer has seen.
    pub async fn peer_term(&self, peer: &NodeId) -> u64 {
        self.peers.lock().await.get(peer).map(|p| p.term).unwrap_or(0)
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn request(
        &self,
        from: &NodeId,
        to: &NodeId,
        message: CouncilMessage,
    ) -> Result<CouncilReply, TransportError> {
        {
            let isolated = self.isolated.lock().await;
            if isolated.contains(to) {
                return Err(TransportError::Unreachable(to.clone()));
            }
            if isolated.contains(from) {
                return Err(TransportError::Unreachable(from.clone()));
            }
        }

        let mut peers = self.peers.lock().await;
        let peer = peers.entry(to.clone()).or_default();

        let reply = match message {
            CouncilMessage::RequestVote { term, candidate, .. } => {
                if term > peer.term {
                    peer.term = term;
                    peer.voted_for = None;
                }
                let granted = term == peer.term
                    && peer.voted_for.as_ref().map_or(true, |v| *v == candidate);
                if granted {
                    peer.voted_for = Some(candidate);
                }
                CouncilReply::Vote { term: peer.term, granted }
            }
            CouncilMessage::AppendEntries { term, entries, .. } => {
                if term < peer.term {
                    CouncilReply::Append { term: peer.term, success: false }
                } else {
                    peer.term = term;
                    if let Some(last) = entries.last() {
                        peer.last_index = peer.last_index.max(last.index);
                    }
                    CouncilReply::Append { term, success: true }
                }
            }
            CouncilMessage::PrePrepare { view, .. } => {
                let accepted = view >= peer.view;
                if accepted {
                    peer.view = view;
                }
                CouncilReply::PrePrepareAck { view: peer.view, accepted }
            }
            CouncilMessage::GossipDigest { proposal_id, votes } => {
                CouncilReply::Digest { proposal_id, votes }
            }
        };

        debug!("loopback {} -> {}: {:?}", from, to, reply);
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_vote(term: u64, candidate: &str) -> CouncilMessage {
        CouncilMessage::RequestVote {
            term,
            candidate: NodeId::from(candidate),
            last_log_index: 0,
            last_log_term: 0,
        }
    }

    #[tokio::test]
    async fn test_one_vote_per_term() {
        let transport = LoopbackTransport::new();
        let peer = NodeId::from("peer-1");

        let first = transport.request(&NodeId::from("a"), &peer, request_vote(1, "a")).await.unwrap();
        assert_eq!(first, CouncilReply::Vote { term: 1, granted: true });

        let second = transport.request(&NodeId::from("b"), &peer, request_vote(1, "b")).await.unwrap();
        assert_eq!(second, CouncilReply::Vote { term: 1, granted: false });

        let next_term = transport.request(&NodeId::from("b"), &peer, request_vote(2, "b")).await.unwrap();
        assert_eq!(next_term, CouncilReply::Vote { term: 2, granted: true });
        assert_eq!(transport.peer_term(&peer).await, 2);
    }

    #[tokio::test]
    async fn test_stale_append_is_refused() {
        let transport = LoopbackTransport::new();
        let peer = NodeId::from("peer-1");
        transport.request(&NodeId::from("a"), &peer, request_vote(5, "a")).await.unwrap();

        let reply = transport
            .request(
                &NodeId::from("old"),
                &peer,
                CouncilMessage::AppendEntries {
                    term: 3,
                    leader: NodeId::from("old"),
                    entries: vec![],
                    leader_commit: 0,
                },
            )
            .await
            .unwrap();
        assert_eq!(reply, CouncilReply::Append { term: 5, success: false });
    }

    #[tokio::test]
    async fn test_isolated_peer_is_unreachable_both_ways() {
        let transport = LoopbackTransport::new();
        let cut = NodeId::from("cut");
        transport.isolate(&cut).await;

        let to_cut = transport.request(&NodeId::from("a"), &cut, request_vote(1, "a")).await;
        assert_eq!(to_cut, Err(TransportError::Unreachable(cut.clone())));

        let from_cut = transport.request(&cut, &NodeId::from("a"), request_vote(1, "cut")).await;
        let err: CouncilError = from_cut.unwrap_err().into();
        assert!(matches!(err, CouncilError::Transport(ref msg) if msg == "peer cut is unreachable"));

        transport.heal(&cut).await;
        assert!(transport.request(&NodeId::from("a"), &cut, request_vote(1, "a")).await.is_ok());
    }
}
