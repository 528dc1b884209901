//! adapter.rs
//!
//! Translation between the legacy proposal / vote vocabulary and the
//! petition / seal vocabulary. Pure functions over plain data.

use council_common::{
    BallotBox, ConsensusResult, Petition, PetitionStatus, Proposal, ProposalResult, ProposalStatus,
    Seal, Vote,
};

pub fn to_petition_status(status: ProposalStatus) -> PetitionStatus {
    match status {
        ProposalStatus::Pending => PetitionStatus::Pending,
        ProposalStatus::Accepted => PetitionStatus::Committed,
        ProposalStatus::Rejected => PetitionStatus::Rejected,
        ProposalStatus::Expired => PetitionStatus::Expired,
    }
}

pub fn to_proposal_status(status: PetitionStatus) -> ProposalStatus {
    match status {
        PetitionStatus::Pending => ProposalStatus::Pending,
        PetitionStatus::Committed => ProposalStatus::Accepted,
        PetitionStatus::Rejected => ProposalStatus::Rejected,
        PetitionStatus::Expired => ProposalStatus::Expired,
    }
}

pub fn to_seal(vote: &Vote) -> Seal {
    Seal {
        voter_id: vote.voter_id.clone(),
        approve: vote.approve,
        confidence: vote.confidence,
        timestamp: vote.timestamp,
        reason: vote.reason.clone(),
    }
}

pub fn to_vote(seal: &Seal) -> Vote {
    Vote {
        voter_id: seal.voter_id.clone(),
        approve: seal.approve,
        confidence: seal.confidence,
        timestamp: seal.timestamp,
        reason: seal.reason.clone(),
    }
}

pub fn to_petition(proposal: &Proposal) -> Petition {
    let mut seals = BallotBox::new();
    for vote in proposal.votes.values() {
        // Keys are unique in the source box, so no cast can collide.
        let _ = seals.cast(&proposal.id, to_seal(vote));
    }
    Petition {
        id: proposal.id.clone(),
        petitioner_id: proposal.proposer_id.clone(),
        value: proposal.value.clone(),
        term: proposal.term,
        timestamp: proposal.timestamp,
        seals,
        status: to_petition_status(proposal.status),
    }
}

pub fn to_consensus_result(result: &ProposalResult) -> ConsensusResult {
    ConsensusResult {
        petition_id: result.proposal_id.clone(),
        approved: result.approved,
        approval_rate: result.approval_rate,
        participation_rate: result.participation_rate,
        final_value: result.final_value.clone(),
        rounds: result.rounds,
        duration_ms: result.duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_common::NodeId;
    use serde_json::json;

    #[test]
    fn test_accepted_maps_to_committed() {
        let mut proposal = Proposal::new("raft_1".into(), NodeId::from("leader"), json!({"k": 1}), 4);
        proposal.votes.cast("raft_1", Vote::new(NodeId::from("a"), true, 0.9)).unwrap();
        proposal.status = ProposalStatus::Accepted;

        let petition = to_petition(&proposal);
        assert_eq!(petition.id, "raft_1");
        assert_eq!(petition.petitioner_id, NodeId::from("leader"));
        assert_eq!(petition.term, 4);
        assert_eq!(petition.status, PetitionStatus::Committed);
        assert_eq!(petition.seals.get(&NodeId::from("a")).unwrap().confidence, 0.9);
    }

    #[test]
    fn test_statuses_map_by_name_both_ways() {
        for status in [
            PetitionStatus::Pending,
            PetitionStatus::Committed,
            PetitionStatus::Rejected,
            PetitionStatus::Expired,
        ] {
            assert_eq!(to_petition_status(to_proposal_status(status)), status);
        }
        assert_eq!(to_proposal_status(PetitionStatus::Expired), ProposalStatus::Expired);
    }

    #[test]
    fn test_seal_keeps_reason() {
        let seal = Seal::new(NodeId::from("n"), false, 0.3).with_reason("too risky");
        let back = to_seal(&to_vote(&seal));
        assert_eq!(back, seal);
    }

    #[test]
    fn test_result_renames_id() {
        let result = ProposalResult {
            proposal_id: "bft_9".into(),
            approved: true,
            approval_rate: 1.0,
            participation_rate: 0.75,
            final_value: json!("v"),
            rounds: 2,
            duration_ms: 12,
        };
        let converted = to_consensus_result(&result);
        assert_eq!(converted.petition_id, "bft_9");
        assert_eq!(converted.rounds, 2);
        assert_eq!(converted.participation_rate, 0.75);
    }
}
