//! evaluator.rs
//!
//! Counting rules shared by the engines: byzantine quorum sizes, strict
//! majorities, plain tallies and the frequency-weighted tally.

use serde::{Deserialize, Serialize};
use tracing::debug;

use council_common::{env::ballot::Ballot, BallotBox, Element};

use crate::registry::NodeRegistry;

/// Multiplier for members whose element matches the configured affinity.
pub const ELEMENT_AFFINITY_BONUS: f64 = 1.25;

/// `f = (n - 1) / 3`.
pub fn max_faulty(n: usize) -> usize {
    n.saturating_sub(1) / 3
}

/// `2f + 1`.
pub fn bft_quorum(n: usize) -> usize {
    2 * max_faulty(n) + 1
}

pub fn is_strict_majority(count: usize, n: usize) -> bool {
    count * 2 > n
}

/// Ratio comparison used by every threshold: equal is not enough.
pub fn meets_quorum(ratio: f64, threshold: f64) -> bool {
    ratio > threshold
}

/// Head count of one ballot box, restricted to current members.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tally {
    pub approvals: usize,
    pub rejections: usize,
    pub members: usize,
}

impl Tally {
    pub fn count<V: Ballot + Clone>(ballots: &BallotBox<V>, registry: &NodeRegistry) -> Self {
        let mut tally = Tally { members: registry.len(), ..Default::default() };
        for ballot in ballots.values().filter(|b| registry.contains(b.voter())) {
            if ballot.approves() {
                tally.approvals += 1;
            } else {
                tally.rejections += 1;
            }
        }
        tally
    }

    pub fn sealed(&self) -> usize {
        self.approvals + self.rejections
    }

    pub fn outstanding(&self) -> usize {
        self.members.saturating_sub(self.sealed())
    }

    /// Approving share of the ballots cast, 0 when nothing was cast.
    pub fn approval_rate(&self) -> f64 {
        ratio(self.approvals, self.sealed())
    }

    pub fn participation_rate(&self) -> f64 {
        ratio(self.sealed(), self.members)
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeightedTally {
    pub approve_weight: f64,
    pub total_weight: f64,
    pub sealed: usize,
    pub members: usize,
}

impl WeightedTally {
    /// `Σ(w·c·approve) / Σ(w·c)`, 0 when no weight was cast.
    pub fn ratio(&self) -> f64 {
        if self.total_weight <= 0.0 {
            0.0
        } else {
            self.approve_weight / self.total_weight
        }
    }

    pub fn participation_rate(&self) -> f64 {
        ratio(self.sealed, self.members)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuorumPolicy {
    pub ratio: f64,
    pub min_participation: f64,
    pub weight_by_frequency: bool,
    pub element_affinity: Option<Element>,
}

impl Default for QuorumPolicy {
    fn default() -> Self {
        Self {
            ratio: council_common::config::DEFAULT_QUORUM_RATIO,
            min_participation: 0.5,
            weight_by_frequency: true,
            element_affinity: None,
        }
    }
}

/// Weighs seals by guardian frequency and decides weighted quorums.
#[derive(Debug, Clone, Default)]
pub struct ConsensusEvaluator {
    pub policy: QuorumPolicy,
}

impl ConsensusEvaluator {
    pub fn new(policy: QuorumPolicy) -> Self {
        Self { policy }
    }

    pub fn member_weight(&self, registry: &NodeRegistry, voter: &council_common::NodeId) -> f64 {
        let Some(member) = registry.get(voter) else {
            return 0.0;
        };
        let mut weight = if self.policy.weight_by_frequency { member.weight() } else { 1.0 };
        if self.policy.element_affinity == Some(member.element()) {
            weight *= ELEMENT_AFFINITY_BONUS;
        }
        weight
    }

    pub fn tally<V: Ballot + Clone>(&self, ballots: &BallotBox<V>, registry: &NodeRegistry) -> WeightedTally {
        let mut tally = WeightedTally { members: registry.len(), ..Default::default() };
        for ballot in ballots.values().filter(|b| registry.contains(b.voter())) {
            let w = self.member_weight(registry, ballot.voter()) * ballot.confidence();
            tally.total_weight += w;
            if ballot.approves() {
                tally.approve_weight += w;
            }
            tally.sealed += 1;
        }
        debug!(
            "weighted tally: approve={:.3} total={:.3} sealed={}/{}",
            tally.approve_weight, tally.total_weight, tally.sealed, tally.members
        );
        tally
    }

    pub fn approves(&self, tally: &WeightedTally) -> bool {
        meets_quorum(tally.ratio(), self.policy.ratio)
            && tally.participation_rate() >= self.policy.min_participation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AddNodeOptions, RegistryCommand};
    use council_common::{NodeId, Seal};

    fn registry(members: &[(&str, Option<&str>)]) -> NodeRegistry {
        let mut reg = NodeRegistry::new();
        for (id, tag) in members {
            let opts = AddNodeOptions { is_primary: false, weight_tag: tag.map(str::to_string) };
            reg.handle_command(RegistryCommand::Register(NodeId::from(*id), opts));
        }
        reg
    }

    fn seals(votes: &[(&str, bool)]) -> BallotBox<Seal> {
        let mut book = BallotBox::new();
        for (voter, approve) in votes {
            book.cast("p", Seal::new(NodeId::from(*voter), *approve, 1.0)).unwrap();
        }
        book
    }

    #[test]
    fn test_bft_quorum_calculation() {
        assert_eq!(max_faulty(1), 0);
        assert_eq!(max_faulty(4), 1);
        assert_eq!(max_faulty(7), 2);
        assert_eq!(bft_quorum(4), 3);
        assert_eq!(bft_quorum(7), 5);
        assert_eq!(bft_quorum(0), 1);
    }

    #[test]
    fn test_tally_ignores_non_members() {
        let reg = registry(&[("a", None), ("b", None), ("c", None)]);
        let tally = Tally::count(&seals(&[("a", true), ("b", false), ("ghost", true)]), &reg);
        assert_eq!(tally.approvals, 1);
        assert_eq!(tally.rejections, 1);
        assert_eq!(tally.outstanding(), 1);
        assert_eq!(tally.approval_rate(), 0.5);
        assert!((tally.participation_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_ratio_at_threshold_is_not_approved() {
        let reg = registry(&[("a", None), ("b", None), ("c", None)]);
        let evaluator = ConsensusEvaluator::default();

        let tie = evaluator.tally(&seals(&[("a", true), ("b", true), ("c", false)]), &reg);
        assert!(!evaluator.approves(&tie));

        let above = evaluator.tally(&seals(&[("a", true), ("b", true)]), &reg);
        assert!(evaluator.approves(&above));
    }

    #[test]
    fn test_affinity_bonus_applies_to_matching_element() {
        let reg = registry(&[("fire", Some("draconia")), ("water", Some("leyla"))]);
        let evaluator = ConsensusEvaluator::new(QuorumPolicy {
            weight_by_frequency: false,
            element_affinity: Some(Element::Fire),
            ..Default::default()
        });
        assert_eq!(evaluator.member_weight(&reg, &NodeId::from("fire")), ELEMENT_AFFINITY_BONUS);
        assert_eq!(evaluator.member_weight(&reg, &NodeId::from("water")), 1.0);
        assert_eq!(evaluator.member_weight(&reg, &NodeId::from("nobody")), 0.0);
    }
}
