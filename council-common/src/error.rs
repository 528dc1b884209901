use thiserror::Error;

use crate::{env::petition::PetitionStatus, utils::NodeId};

#[derive(Debug, Error)]
pub enum CouncilError {
    #[error("Unrecognized council protocol: {0}")]
    InvalidProtocol(String),

    #[error("Node {voter} already sealed petition {petition_id}")]
    DuplicateSeal { petition_id: String, voter: NodeId },

    #[error("Petition {0} not found")]
    UnknownPetition(String),

    #[error("Node {0} is not a council member")]
    UnknownNode(NodeId),

    #[error("Petition {petition_id} is already {status}")]
    PetitionClosed {
        petition_id: String,
        status: PetitionStatus,
    },

    #[error("Invalid seal: {0}")]
    InvalidSeal(String),

    #[error("Only leader can propose (current leader: {leader:?})")]
    NotLeader { leader: Option<NodeId> },

    #[error("Only primary can propose (current primary: {primary:?})")]
    NotPrimary { primary: Option<NodeId> },

    #[error("Council engine has been shut down")]
    EngineShutdown,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CouncilError>;
