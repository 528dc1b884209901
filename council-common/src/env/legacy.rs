//! legacy.rs
//!
//! The proposal / vote / result vocabulary used by the leader-replication,
//! byzantine and gossip engines. It predates the petition / seal vocabulary
//! and is translated at the council boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    env::{
        ballot::{Ballot, BallotBox},
        petition::validate_confidence,
    },
    error::CouncilError,
    utils::{time::current_time_millis, NodeId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Accepted,
    Rejected,
    Expired,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_id: NodeId,
    pub approve: bool,
    pub confidence: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Vote {
    pub fn new(voter_id: NodeId, approve: bool, confidence: f64) -> Self {
        Self {
            voter_id,
            approve,
            confidence,
            timestamp: current_time_millis(),
            reason: None,
        }
    }

    pub fn validate(&self) -> Result<(), CouncilError> {
        validate_confidence(self.confidence)
    }
}

impl Ballot for Vote {
    fn voter(&self) -> &NodeId {
        &self.voter_id
    }

    fn approves(&self) -> bool {
        self.approve
    }

    fn confidence(&self) -> f64 {
        self.confidence
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub proposer_id: NodeId,
    pub value: Value,
    pub term: u64,
    pub timestamp: i64,
    pub votes: BallotBox<Vote>,
    pub status: ProposalStatus,
}

impl Proposal {
    pub fn new(id: String, proposer_id: NodeId, value: Value, term: u64) -> Self {
        Self {
            id,
            proposer_id,
            value,
            term,
            timestamp: current_time_millis(),
            votes: BallotBox::new(),
            status: ProposalStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalResult {
    pub proposal_id: String,
    pub approved: bool,
    pub approval_rate: f64,
    pub participation_rate: f64,
    pub final_value: Value,
    pub rounds: u32,
    pub duration_ms: u64,
}
