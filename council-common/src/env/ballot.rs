use std::collections::{btree_map::Entry, BTreeMap};

use serde::{Deserialize, Serialize};

use crate::{error::CouncilError, utils::NodeId};

/// Common view over a single node's decision, in either field vocabulary.
pub trait Ballot {
    fn voter(&self) -> &NodeId;
    fn approves(&self) -> bool;
    fn confidence(&self) -> f64;
}

/// Ballots of one petition, keyed by voter.
///
/// A voter owns exactly one slot. `cast` only fills an empty slot, so
/// concurrent or repeated writes can never replace an existing ballot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BallotBox<V> {
    entries: BTreeMap<NodeId, V>,
}

impl<V> Default for BallotBox<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V: Ballot + Clone> BallotBox<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a ballot. Fails with `DuplicateSeal` if the voter already has one.
    pub fn cast(&mut self, petition_id: &str, ballot: V) -> Result<(), CouncilError> {
        match self.entries.entry(ballot.voter().clone()) {
            Entry::Occupied(e) => Err(CouncilError::DuplicateSeal {
                petition_id: petition_id.to_string(),
                voter: e.key().clone(),
            }),
            Entry::Vacant(v) => {
                v.insert(ballot);
                Ok(())
            }
        }
    }

    /// Per-voter union with another box. Existing ballots win, so the merge is
    /// idempotent and, for honest voters, order independent.
    /// Returns the number of ballots learned.
    pub fn merge(&mut self, other: &BallotBox<V>) -> usize {
        let mut learned = 0;
        for (voter, ballot) in &other.entries {
            if let Entry::Vacant(v) = self.entries.entry(voter.clone()) {
                v.insert(ballot.clone());
                learned += 1;
            }
        }
        learned
    }

    /// Takes `voter`'s ballot out of the box, freeing the slot.
    pub fn withdraw(&mut self, voter: &NodeId) -> Option<V> {
        self.entries.remove(voter)
    }

    pub fn get(&self, voter: &NodeId) -> Option<&V> {
        self.entries.get(voter)
    }

    pub fn contains(&self, voter: &NodeId) -> bool {
        self.entries.contains_key(voter)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::petition::Seal;

    fn seal(voter: &str, approve: bool) -> Seal {
        Seal::new(NodeId::from(voter), approve, 1.0)
    }

    #[test]
    fn test_cast_rejects_second_ballot_and_keeps_first() {
        let mut book = BallotBox::new();
        book.cast("p1", seal("node1", true)).unwrap();

        let err = book.cast("p1", seal("node1", false)).unwrap_err();
        assert!(matches!(err, CouncilError::DuplicateSeal { ref voter, .. } if voter.as_str() == "node1"));
        assert!(book.get(&NodeId::from("node1")).unwrap().approve);
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_withdraw_frees_the_slot() {
        let mut book = BallotBox::new();
        book.cast("p1", seal("gone", false)).unwrap();
        book.cast("p1", seal("stays", true)).unwrap();

        assert!(!book.withdraw(&NodeId::from("gone")).unwrap().approve);
        assert!(book.withdraw(&NodeId::from("gone")).is_none());
        assert_eq!(book.len(), 1);
        book.cast("p1", seal("gone", true)).unwrap();
        assert!(book.get(&NodeId::from("gone")).unwrap().approve);
    }

    #[test]
    fn test_merge_is_union_and_idempotent() {
        let mut a = BallotBox::new();
        a.cast("p1", seal("a", true)).unwrap();
        let mut b = BallotBox::new();
        b.cast("p1", seal("b", false)).unwrap();
        b.cast("p1", seal("c", true)).unwrap();

        assert_eq!(a.merge(&b), 2);
        assert_eq!(a.merge(&b), 0);
        assert_eq!(a.len(), 3);

        let mut b2 = b.clone();
        b2.merge(&a);
        assert_eq!(a, b2);
    }
}
