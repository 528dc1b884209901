use serde::{Deserialize, Serialize};

use crate::error::{CouncilError, Result};

/// Default budget for a petition to reach a terminal status.
pub const DEFAULT_CONSENSUS_TIMEOUT_MS: u64 = 30_000;

/// Default weighted approval threshold (strictly exceeded to approve).
pub const DEFAULT_QUORUM_RATIO: f64 = 2.0 / 3.0;

/// Engine-wide tunables passed to `initialize`.
///
/// Every field is optional; an absent field keeps the protocol's own default.
/// Fields that do not apply to the wrapped protocol are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CouncilConfig {
    /// Weighted approval threshold (gate-quorum) or approve fraction (whisper).
    pub quorum_ratio: Option<f64>,
    /// Minimum fraction of members that must seal.
    pub min_participation: Option<f64>,
    /// Petition / round timeout.
    pub timeout_ms: Option<u64>,
    /// Gossip peers contacted per node per round.
    pub fanout: Option<usize>,
    /// Leader heartbeat interval.
    pub heartbeat_interval_ms: Option<u64>,
    pub gossip_interval_ms: Option<u64>,
    pub max_rounds: Option<u32>,
}

impl CouncilConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("quorum_ratio", self.quorum_ratio),
            ("min_participation", self.min_participation),
        ] {
            if let Some(r) = ratio {
                if !(0.0..=1.0).contains(&r) {
                    return Err(CouncilError::Config(format!("{} must be within [0, 1], got {}", name, r)));
                }
            }
        }
        if self.fanout == Some(0) {
            return Err(CouncilError::Config("fanout must be at least 1".into()));
        }
        for (name, ms) in [
            ("timeout_ms", self.timeout_ms),
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("gossip_interval_ms", self.gossip_interval_ms),
        ] {
            if ms == Some(0) {
                return Err(CouncilError::Config(format!("{} must be positive", name)));
            }
        }
        if self.max_rounds == Some(0) {
            return Err(CouncilError::Config("max_rounds must be positive".into()));
        }
        Ok(())
    }
}
