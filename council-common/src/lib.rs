pub mod config;
pub mod env;
pub mod error;
pub mod utils;

pub use config::CouncilConfig;
pub use env::{
    ballot::BallotBox,
    guardian::{Element, Guardian},
    legacy::{Proposal, ProposalResult, ProposalStatus, Vote},
    petition::{ConsensusResult, Petition, PetitionStatus, Seal},
    snapshot::CouncilSnapshot,
};
pub use error::{CouncilError, Result};
pub use utils::NodeId;
