use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    env::ballot::{Ballot, BallotBox},
    error::CouncilError,
    utils::{time::current_time_millis, NodeId},
};

/// Lifecycle of a petition. Every status other than `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PetitionStatus {
    Pending,
    Committed,
    Rejected,
    Expired,
}

impl PetitionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PetitionStatus::Pending)
    }
}

impl fmt::Display for PetitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PetitionStatus::Pending => "pending",
            PetitionStatus::Committed => "committed",
            PetitionStatus::Rejected => "rejected",
            PetitionStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// One node's approve/reject decision on a petition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seal {
    pub voter_id: NodeId,
    pub approve: bool,
    /// Certainty of the voter, in `[0, 1]`.
    pub confidence: f64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Seal {
    pub fn new(voter_id: NodeId, approve: bool, confidence: f64) -> Self {
        Self {
            voter_id,
            approve,
            confidence,
            timestamp: current_time_millis(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn validate(&self) -> Result<(), CouncilError> {
        validate_confidence(self.confidence)
    }
}

impl Ballot for Seal {
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

pub(crate) fn validate_confidence(confidence: f64) -> Result<(), CouncilError> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(CouncilError::InvalidSeal(format!(
            "confidence {} outside [0, 1]",
            confidence
        )));
    }
    Ok(())
}

/// A proposed value awaiting agreement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Petition {
    pub id: String,
    pub petitioner_id: NodeId,
    pub value: Value,
    pub term: u64,
    /// Milliseconds since the UNIX epoch.
    pub timestamp: i64,
    pub seals: BallotBox<Seal>,
    pub status: PetitionStatus,
}

impl Petition {
    pub fn new(id: String, petitioner_id: NodeId, value: Value, term: u64) -> Self {
        Self {
            id,
            petitioner_id,
            value,
            term,
            timestamp: current_time_millis(),
            seals: BallotBox::new(),
            status: PetitionStatus::Pending,
        }
    }
}

/// Outcome of a petition, returned once its status is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub petition_id: String,
    pub approved: bool,
    pub approval_rate: f64,
    pub participation_rate: f64,
    pub final_value: Value,
    pub rounds: u32,
    pub duration_ms: u64,
}
