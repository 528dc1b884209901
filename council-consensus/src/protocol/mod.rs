//! protocol
//!
//! The four consensus engines. Leader-replication, byzantine and gossip
//! speak the legacy proposal / vote vocabulary through `LegacyConsensus`;
//! gate-quorum speaks petitions and seals natively.
//!
//! Every engine follows the same concurrency shape: state behind a tokio
//! mutex, a `Progress` signal bumped on every state change, and background
//! jobs in a `TimerSet`. Waiters re-check state on each bump and give up at
//! the item's deadline, so no wait is unbounded.

pub mod byzantine;
pub mod gate_quorum;
pub mod gossip;
pub mod leader;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::{
    sync::{broadcast, watch},
    time::{sleep_until, Instant},
};

use council_common::{
    CouncilConfig, CouncilError, NodeId, Proposal, ProposalResult, ProposalStatus, Result, Vote,
};

use crate::{
    adapter::to_petition_status,
    evaluator::Tally,
    events::CouncilEvent,
    pool::{PetitionPool, Tracked},
    registry::{AddNodeOptions, NodeRegistry, RegistryEvent},
};

pub use byzantine::{ByzantineOptions, ByzantineQuorum};
pub use gate_quorum::{GateQuorum, GateQuorumOptions};
pub use gossip::{GossipOptions, GossipPropagation};
pub use leader::{LeaderOptions, LeaderReplication, Role};

/// Uniform contract of the engines that use proposal / vote fields.
#[async_trait]
pub trait LegacyConsensus: Send + Sync {
    fn protocol(&self) -> &'static str;
    fn node_id(&self) -> &NodeId;
    fn subscribe(&self) -> broadcast::Receiver<CouncilEvent>;

    async fn initialize(&self, config: Option<&CouncilConfig>) -> Result<()>;
    async fn shutdown(&self);

    async fn add_node(&self, id: NodeId, opts: &AddNodeOptions) -> Result<RegistryEvent>;
    async fn remove_node(&self, id: &NodeId) -> Result<RegistryEvent>;

    async fn propose(&self, value: Value) -> Result<Proposal>;
    async fn vote(&self, proposal_id: &str, vote: Vote) -> Result<()>;
    async fn await_consensus(&self, proposal_id: &str) -> Result<ProposalResult>;

    async fn proposal(&self, id: &str) -> Option<Proposal>;
    async fn prune(&self, id: &str) -> bool;
    async fn proposals(&self) -> Vec<Proposal>;
    async fn results(&self) -> Vec<ProposalResult>;
}

/// Why a waiter woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Changed,
    Deadline,
}

/// Change counter plus a closed flag, shared by an engine and its waiters.
#[derive(Debug)]
pub struct Progress {
    tx: watch::Sender<u64>,
    closed: AtomicBool,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self { tx, closed: AtomicBool::new(false) }
    }

    pub fn bump(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Marks the engine closed and wakes every waiter.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.bump();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(CouncilError::EngineShutdown);
        }
        Ok(())
    }

    /// Subscribe before inspecting state, so a bump in between is not lost.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    pub async fn wait(&self, rx: &mut watch::Receiver<u64>, deadline: Instant) -> Result<Wake> {
        tokio::select! {
            changed = rx.changed() => match changed {
                Ok(()) => Ok(Wake::Changed),
                Err(_) => Err(CouncilError::EngineShutdown),
            },
            _ = sleep_until(deadline) => Ok(Wake::Deadline),
        }
    }
}

/// Id with the protocol's prefix, e.g. `raft_…`.
pub(crate) fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

pub(crate) type ProposalPool = PetitionPool<Proposal, ProposalResult>;

/// Checks that `vote` may be cast and returns the proposal it targets.
pub(crate) fn admit_vote<'a>(
    pool: &'a mut ProposalPool,
    members: &NodeRegistry,
    proposal_id: &str,
    vote: &Vote,
) -> Result<&'a mut Tracked<Proposal, ProposalResult>> {
    vote.validate()?;
    let tracked = pool
        .find_by_id_mut(proposal_id)
        .ok_or_else(|| CouncilError::UnknownPetition(proposal_id.to_string()))?;
    if tracked.item.status.is_terminal() {
        return Err(CouncilError::PetitionClosed {
            petition_id: proposal_id.to_string(),
            status: to_petition_status(tracked.item.status),
        });
    }
    if !members.contains(&vote.voter_id) {
        return Err(CouncilError::UnknownNode(vote.voter_id.clone()));
    }
    Ok(tracked)
}

/// Takes `voter`'s ballots out of every unsettled proposal, so a member that
/// leaves stops counting and starts clean if it rejoins.
pub(crate) fn withdraw_votes(pool: &mut ProposalPool, voter: &NodeId) {
    for (_, tracked) in pool.iter_mut() {
        if !tracked.is_settled() {
            tracked.item.votes.withdraw(voter);
        }
    }
}

/// Moves a proposal to `status` and records its result.
pub(crate) fn close_proposal(
    tracked: &mut Tracked<Proposal, ProposalResult>,
    members: &NodeRegistry,
    status: ProposalStatus,
) -> ProposalResult {
    let tally = Tally::count(&tracked.item.votes, members);
    tracked.item.status = status;
    let result = ProposalResult {
        proposal_id: tracked.item.id.clone(),
        approved: status == ProposalStatus::Accepted,
        approval_rate: tally.approval_rate(),
        participation_rate: tally.participation_rate(),
        final_value: tracked.item.value.clone(),
        rounds: tracked.rounds,
        duration_ms: tracked.elapsed_ms(),
    };
    tracked.result = Some(result.clone());
    result
}
