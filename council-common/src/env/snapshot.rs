use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    env::petition::{ConsensusResult, Petition},
    error::Result,
    utils::{time::current_time_millis, NodeId},
};

/// Point-in-time copy of an engine's petitions and results.
///
/// Engines keep everything in memory; a snapshot is the only way state leaves
/// the process, and only when the caller writes it out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouncilSnapshot {
    pub node_id: NodeId,
    pub protocol: String,
    pub taken_at: i64,
    pub petitions: Vec<Petition>,
    pub results: Vec<ConsensusResult>,
}

impl CouncilSnapshot {
    pub fn new(
        node_id: NodeId,
        protocol: &str,
        petitions: Vec<Petition>,
        results: Vec<ConsensusResult>,
    ) -> Self {
        Self {
            node_id,
            protocol: protocol.to_string(),
            taken_at: current_time_millis(),
            petitions,
            results,
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}
