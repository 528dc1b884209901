//! simulation.rs
//!
//! Drives one consensus round through the council façade: register the
//! members from the council file, petition its value, cast every configured
//! seal and wait for the outcome.

use serde::Serialize;
use tracing::{info, warn};

use council_common::{ConsensusResult, CouncilError, NodeId, Petition, Result};
use council_consensus::{CouncilEngine, CouncilEngineOptions};

use crate::config::CouncilFile;

/// A seal the engine turned down. The round goes on without it.
#[derive(Debug, Clone, Serialize)]
pub struct RefusedSeal {
    pub voter: NodeId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub protocol: String,
    pub degraded: bool,
    pub petition: Petition,
    pub result: ConsensusResult,
    pub refused: Vec<RefusedSeal>,
}

/// Engine named by the file, or picked from its element.
pub fn build_engine(file: &CouncilFile) -> CouncilEngine {
    match file.requested_protocol() {
        Some(name) => CouncilEngine::from_name(name, file.node_id.clone()),
        None => CouncilEngine::new(CouncilEngineOptions::new(file.element_protocol(), file.node_id.clone())),
    }
}

pub async fn run_round(engine: &CouncilEngine, file: &CouncilFile) -> Result<RoundReport> {
    for member in &file.members {
        engine.add_node(member.id.clone(), &member.options()).await?;
    }
    engine.initialize(Some(&file.council)).await?;

    let petition = engine.propose(file.value.clone()).await?;
    info!("petition {} opened under {}", petition.id, engine.get_protocol());

    let mut refused = Vec::new();
    for member in &file.members {
        let Some(entry) = &member.seal else { continue };
        match engine.vote(&petition.id, entry.to_seal(&member.id)).await {
            Ok(()) => {}
            Err(
                err @ (CouncilError::PetitionClosed { .. }
                | CouncilError::DuplicateSeal { .. }
                | CouncilError::UnknownNode(_)
                | CouncilError::InvalidSeal(_)),
            ) => {
                warn!("seal from {} refused: {}", member.id, err);
                refused.push(RefusedSeal { voter: member.id.clone(), reason: err.to_string() });
            }
            Err(err) => return Err(err),
        }
    }

    let result = engine.await_consensus(&petition.id).await?;
    info!(
        "petition {} settled: approved={} approval={:.3} participation={:.2}",
        result.petition_id, result.approved, result.approval_rate, result.participation_rate
    );
    let petition = engine
        .petition(&petition.id)
        .await
        .ok_or_else(|| CouncilError::UnknownPetition(petition.id.clone()))?;

    Ok(RoundReport {
        protocol: engine.get_protocol().to_string(),
        degraded: engine.protocol_status().is_degraded(),
        petition,
        result,
        refused,
    })
}
