//! byzantine.rs
//!
//! Single-round byzantine quorum behind `shinkamis-decree`. With `N` members
//! up to `f = (N - 1) / 3` may be faulty; `2f + 1` matching seals decide.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::{
    sync::{broadcast, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, info, warn};

use council_common::{
    CouncilConfig, CouncilError, NodeId, Proposal, ProposalResult, ProposalStatus, Result, Vote,
};

use super::{admit_vote, close_proposal, new_id, withdraw_votes, LegacyConsensus, ProposalPool, Progress, Wake};
use crate::{
    evaluator::{bft_quorum, max_faulty, Tally},
    events::{CouncilEvent, EventBus},
    pool::Tracked,
    registry::{AddNodeOptions, NodeRegistry, RegistryCommand, RegistryEvent},
    timers::TimerSet,
    transport::{CouncilMessage, CouncilReply, Transport},
};

pub const PROTOCOL: &str = "shinkamis-decree";

#[derive(Debug, Clone)]
pub struct ByzantineOptions {
    /// Silence from the primary after which replicas move to the next view.
    pub view_change_timeout: Duration,
    pub round_timeout: Duration,
}

impl Default for ByzantineOptions {
    fn default() -> Self {
        Self {
            view_change_timeout: Duration::from_millis(5_000),
            round_timeout: Duration::from_millis(council_common::config::DEFAULT_CONSENSUS_TIMEOUT_MS),
        }
    }
}

impl ByzantineOptions {
    fn apply(&mut self, config: &CouncilConfig) {
        if let Some(ms) = config.timeout_ms {
            self.round_timeout = Duration::from_millis(ms);
        }
    }
}

/// SHA-256 over the sequence number and the canonical JSON of the value.
pub fn digest_of(value: &Value, sequence: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_be_bytes());
    hasher.update(value.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

struct State {
    view: u64,
    sequence: u64,
    primary: NodeId,
    members: NodeRegistry,
    pool: ProposalPool,
    /// (view, sequence) -> digest of the pre-prepare accepted for that slot.
    pre_prepares: HashMap<(u64, u64), String>,
    last_primary_contact: Instant,
    options: ByzantineOptions,
    initialized: bool,
}

struct Shared {
    node_id: NodeId,
    state: Mutex<State>,
    progress: Progress,
    events: EventBus,
    timers: TimerSet,
    transport: Arc<dyn Transport>,
}

#[derive(Clone)]
pub struct ByzantineQuorum {
    shared: Arc<Shared>,
}

impl ByzantineQuorum {
    pub fn new(node_id: NodeId, options: ByzantineOptions, transport: Arc<dyn Transport>) -> Self {
        let mut members = NodeRegistry::new();
        members.handle_command(RegistryCommand::Register(node_id.clone(), AddNodeOptions::default()));

        let state = State {
            view: 0,
            sequence: 0,
            primary: node_id.clone(),
            members,
            pool: ProposalPool::new(),
            pre_prepares: HashMap::new(),
            last_primary_contact: Instant::now(),
            options,
            initialized: false,
        };

        Self {
            shared: Arc::new(Shared {
                node_id,
                state: Mutex::new(state),
                progress: Progress::new(),
                events: EventBus::new(),
                timers: TimerSet::new(),
                transport,
            }),
        }
    }

    pub async fn view_number(&self) -> u64 {
        self.shared.state.lock().await.view
    }

    pub async fn sequence_number(&self) -> u64 {
        self.shared.state.lock().await.sequence
    }

    pub async fn primary_id(&self) -> NodeId {
        self.shared.state.lock().await.primary.clone()
    }

    pub async fn is_primary(&self) -> bool {
        self.primary_id().await == self.shared.node_id
    }

    pub async fn max_faulty_nodes(&self) -> usize {
        max_faulty(self.shared.state.lock().await.members.len())
    }

    pub async fn can_tolerate(&self, faulty: usize) -> bool {
        faulty <= self.max_faulty_nodes().await
    }

    /// Moves to the next view and promotes the next registered member.
    pub async fn initiate_view_change(&self) -> NodeId {
        self.shared.view_change().await
    }

    /// Inbound pre-prepare from `from`. Returns whether it was accepted.
    ///
    /// A second pre-prepare for the same `(view, sequence)` carrying another
    /// digest is equivocation: the sender is reported and the view changes.
    pub async fn handle_pre_prepare(
        &self,
        from: &NodeId,
        view: u64,
        sequence: u64,
        digest: &str,
        proposal: Proposal,
    ) -> bool {
        if digest_of(&proposal.value, sequence) != digest {
            warn!(target: "consensus", "EVENT:VERIFY_PROPOSAL_FAIL id={} from={}", proposal.id, from);
            return false;
        }

        let equivocation = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            if view < state.view {
                debug!("stale pre-prepare from {} for view {} < {}", from, view, state.view);
                return false;
            }
            if view == state.view && *from != state.primary {
                debug!("pre-prepare from {} who is not primary of view {}", from, view);
                return false;
            }

            match state.pre_prepares.get(&(view, sequence)) {
                Some(existing) if existing != digest => true,
                Some(_) => return true,
                None => {
                    if view > state.view {
                        state.view = view;
                        state.primary = from.clone();
                    }
                    state.pre_prepares.insert((view, sequence), digest.to_string());
                    state.sequence = state.sequence.max(sequence);
                    state.last_primary_contact = Instant::now();
                    let id = proposal.id.clone();
                    let timeout = state.options.round_timeout;
                    state.pool.add(id, Tracked::new(proposal.clone(), timeout));
                    false
                }
            }
        };

        if equivocation {
            warn!(target: "consensus", "EVENT:EQUIVOCATION offender={} view={} sequence={}", from, view, sequence);
            self.shared.events.emit(CouncilEvent::EquivocationDetected {
                offender: from.clone(),
                view,
                sequence,
            });
            self.shared.view_change().await;
            return false;
        }

        info!(target: "consensus", "EVENT:RECEIVE_PROPOSAL id={} from={} view={} sequence={}", proposal.id, from, view, sequence);
        self.shared.progress.bump();
        true
    }

    async fn spawn_timers(&self, options: &ByzantineOptions) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let period = options.view_change_timeout.min(options.round_timeout);
        self.shared
            .timers
            .every(period, None, move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.watchdog().await;
                    }
                }
            })
            .await;
    }
}

impl Shared {
    async fn watchdog(&self) {
        let suspect = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let now = Instant::now();
            let due: Vec<String> = state
                .pool
                .unsettled_ids()
                .into_iter()
                .filter(|id| state.pool.find_by_id(id).map_or(false, |t| t.deadline <= now))
                .collect();
            for id in due {
                self.expire(state, &id);
            }
            state.primary != self.node_id
                && state.last_primary_contact.elapsed() >= state.options.view_change_timeout
        };
        if suspect {
            self.view_change().await;
        }
    }

    async fn view_change(&self) -> NodeId {
        let (view, primary) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let next = state.members.next_after(&state.primary).unwrap_or_else(|| self.node_id.clone());
            state.view += 1;
            state.primary = next.clone();
            state.last_primary_contact = Instant::now();
            for (_, tracked) in state.pool.iter_mut() {
                if !tracked.is_settled() {
                    tracked.rounds += 1;
                }
            }
            (state.view, next)
        };
        info!(target: "consensus", "EVENT:VIEW_CHANGE view={} primary={}", view, primary);
        self.events.emit(CouncilEvent::ViewChanged { view, primary: primary.clone() });
        self.progress.bump();
        primary
    }

    fn decide(&self, state: &mut State, id: &str) -> Option<ProposalResult> {
        let quorum = bft_quorum(state.members.len());
        let tracked = state.pool.find_by_id_mut(id)?;
        if let Some(result) = &tracked.result {
            return Some(result.clone());
        }
        let tally = Tally::count(&tracked.item.votes, &state.members);
        let status = if tally.approvals >= quorum {
            ProposalStatus::Accepted
        } else if tally.rejections >= quorum {
            ProposalStatus::Rejected
        } else {
            return None;
        };
        let result = close_proposal(tracked, &state.members, status);
        info!(target: "consensus", "EVENT:COMMIT id={} approved={} quorum={} view={}", id, result.approved, quorum, state.view);
        self.events.emit(CouncilEvent::QuorumReached { id: id.to_string(), approved: result.approved });
        self.progress.bump();
        Some(result)
    }

    fn decide_unsettled(&self, state: &mut State) {
        for id in state.pool.unsettled_ids() {
            self.decide(state, &id);
        }
    }

    fn expire(&self, state: &mut State, id: &str) -> Option<ProposalResult> {
        let tracked = state.pool.find_by_id_mut(id)?;
        if let Some(result) = &tracked.result {
            return Some(result.clone());
        }
        let result = close_proposal(tracked, &state.members, ProposalStatus::Expired);
        info!(target: "consensus", "EVENT:EXPIRED id={}", id);
        self.events.emit(CouncilEvent::Expired { id: id.to_string() });
        self.progress.bump();
        Some(result)
    }
}

#[async_trait]
impl LegacyConsensus for ByzantineQuorum {
    fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    fn node_id(&self) -> &NodeId {
        &self.shared.node_id
    }

    fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.shared.events.subscribe()
    }

    async fn initialize(&self, config: Option<&CouncilConfig>) -> Result<()> {
        self.shared.progress.ensure_open()?;
        let options = {
            let mut state = self.shared.state.lock().await;
            if let Some(config) = config {
                config.validate()?;
                state.options.apply(config);
            }
            if state.initialized {
                return Ok(());
            }
            state.initialized = true;
            state.last_primary_contact = Instant::now();
            state.options.clone()
        };
        info!("{} initialized as {} (view change after {:?})", self.shared.node_id, PROTOCOL, options.view_change_timeout);
        self.shared.events.emit(CouncilEvent::Initialized {
            node_id: self.shared.node_id.clone(),
            protocol: PROTOCOL.to_string(),
        });
        self.spawn_timers(&options).await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.shared.progress.close();
        let stopped = self.shared.timers.cancel_all().await;
        info!("{} shut down ({} timers stopped)", self.shared.node_id, stopped);
        self.shared.events.emit(CouncilEvent::Shutdown {
            node_id: self.shared.node_id.clone(),
            protocol: PROTOCOL.to_string(),
        });
    }

    async fn add_node(&self, id: NodeId, opts: &AddNodeOptions) -> Result<RegistryEvent> {
        self.shared.progress.ensure_open()?;
        let event = {
            let mut state = self.shared.state.lock().await;
            let event = state.members.handle_command(RegistryCommand::Register(id.clone(), opts.clone()));
            if opts.is_primary && matches!(event, RegistryEvent::Registered(_)) {
                state.primary = id;
                state.last_primary_contact = Instant::now();
            }
            self.shared.decide_unsettled(&mut state);
            event
        };
        debug!("{}: {:?}", self.shared.node_id, event);
        self.shared.progress.bump();
        Ok(event)
    }

    async fn remove_node(&self, id: &NodeId) -> Result<RegistryEvent> {
        self.shared.progress.ensure_open()?;
        let (event, was_primary) = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let was_primary = state.primary == *id;
            let event = state.members.handle_command(RegistryCommand::Drop(id.clone()));
            if matches!(event, RegistryEvent::Dropped(_)) {
                withdraw_votes(&mut state.pool, id);
            }
            // A smaller council lowers 2f+1, which may settle open proposals.
            self.shared.decide_unsettled(state);
            (event, was_primary)
        };
        debug!("{}: {:?}", self.shared.node_id, event);
        if was_primary && matches!(event, RegistryEvent::Dropped(_)) {
            // The removed primary is no longer registered, so rotation
            // restarts from the first member.
            self.shared.view_change().await;
        } else {
            self.shared.progress.bump();
        }
        Ok(event)
    }

    async fn propose(&self, value: Value) -> Result<Proposal> {
        self.shared.progress.ensure_open()?;
        let (proposal, view, sequence, digest, peers) = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            if state.primary != self.shared.node_id {
                return Err(CouncilError::NotPrimary { primary: Some(state.primary.clone()) });
            }
            state.sequence += 1;
            let sequence = state.sequence;
            let digest = digest_of(&value, sequence);
            let proposal = Proposal::new(new_id("bft"), self.shared.node_id.clone(), value, state.view);
            state.pre_prepares.insert((state.view, sequence), digest.clone());
            state.pool.add(proposal.id.clone(), Tracked::new(proposal.clone(), state.options.round_timeout));
            (proposal, state.view, sequence, digest, state.members.peers_of(&self.shared.node_id))
        };

        info!(target: "consensus", "EVENT:PROPOSE id={} proposer={} view={} sequence={} digest={}", proposal.id, proposal.proposer_id, view, sequence, digest);
        self.shared.events.emit(CouncilEvent::Proposed {
            id: proposal.id.clone(),
            protocol: PROTOCOL.to_string(),
        });
        self.shared.progress.bump();

        for peer in peers {
            let message = CouncilMessage::PrePrepare {
                view,
                sequence,
                digest: digest.clone(),
                proposal: proposal.clone(),
            };
            match self.shared.transport.request(&self.shared.node_id, &peer, message).await {
                Ok(CouncilReply::PrePrepareAck { accepted: true, .. }) => {}
                Ok(reply) => debug!("pre-prepare {} not accepted by {}: {:?}", proposal.id, peer, reply),
                Err(e) => debug!("pre-prepare {} to {} failed: {}", proposal.id, peer, e),
            }
        }
        Ok(proposal)
    }

    async fn vote(&self, proposal_id: &str, vote: Vote) -> Result<()> {
        self.shared.progress.ensure_open()?;
        let (voter, approve) = (vote.voter_id.clone(), vote.approve);
        {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let tracked = admit_vote(&mut state.pool, &state.members, proposal_id, &vote)?;
            tracked.item.votes.cast(proposal_id, vote)?;
            if voter == state.primary {
                state.last_primary_contact = Instant::now();
            }
            info!(target: "consensus", "EVENT:VOTE proposal_id={} voter={} approve={}", proposal_id, voter, approve);
            self.shared.events.emit(CouncilEvent::SealRecorded {
                id: proposal_id.to_string(),
                voter,
                approve,
            });
            self.shared.decide(state, proposal_id);
        }
        self.shared.progress.bump();
        Ok(())
    }

    async fn await_consensus(&self, proposal_id: &str) -> Result<ProposalResult> {
        let progress = &self.shared.progress;
        let mut rx = progress.watch();
        loop {
            progress.ensure_open()?;
            let deadline = {
                let mut guard = self.shared.state.lock().await;
                let state = &mut *guard;
                let tracked = state
                    .pool
                    .find_by_id(proposal_id)
                    .ok_or_else(|| CouncilError::UnknownPetition(proposal_id.to_string()))?;
                if let Some(result) = &tracked.result {
                    return Ok(result.clone());
                }
                let deadline = tracked.deadline;
                if let Some(result) = self.shared.decide(state, proposal_id) {
                    return Ok(result);
                }
                deadline
            };

            if progress.wait(&mut rx, deadline).await? == Wake::Deadline {
                progress.ensure_open()?;
                let mut guard = self.shared.state.lock().await;
                return self
                    .shared
                    .expire(&mut guard, proposal_id)
                    .ok_or_else(|| CouncilError::UnknownPetition(proposal_id.to_string()));
            }
        }
    }

    async fn proposal(&self, id: &str) -> Option<Proposal> {
        self.shared.state.lock().await.pool.find_by_id(id).map(|t| t.item.clone())
    }

    async fn prune(&self, id: &str) -> bool {
        self.shared.state.lock().await.pool.remove(id).is_some()
    }

    async fn proposals(&self) -> Vec<Proposal> {
        self.shared.state.lock().await.pool.items().cloned().collect()
    }

    async fn results(&self) -> Vec<ProposalResult> {
        self.shared.state.lock().await.pool.results().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use serde_json::json;

    async fn council(size: usize) -> ByzantineQuorum {
        let bft = ByzantineQuorum::new(
            NodeId::from("n0"),
            ByzantineOptions::default(),
            Arc::new(LoopbackTransport::new()),
        );
        for i in 1..size {
            bft.add_node(NodeId(format!("n{}", i)), &AddNodeOptions::default()).await.unwrap();
        }
        bft
    }

    fn seal(voter: &str, approve: bool) -> Vote {
        Vote::new(NodeId::from(voter), approve, 1.0)
    }

    #[tokio::test]
    async fn test_fault_tolerance_by_size() {
        assert_eq!(council(1).await.max_faulty_nodes().await, 0);
        assert_eq!(council(4).await.max_faulty_nodes().await, 1);
        let seven = council(7).await;
        assert_eq!(seven.max_faulty_nodes().await, 2);
        assert!(seven.can_tolerate(2).await);
        assert!(!seven.can_tolerate(3).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_supermajority_commits() {
        let bft = council(4).await;
        bft.initialize(None).await.unwrap();
        assert!(bft.is_primary().await);

        let proposal = bft.propose(json!({"decree": 1})).await.unwrap();
        assert!(proposal.id.starts_with("bft_"));
        assert_eq!(bft.sequence_number().await, 1);

        for voter in ["n0", "n1", "n2"] {
            bft.vote(&proposal.id, seal(voter, true)).await.unwrap();
        }
        let result = bft.await_consensus(&proposal.id).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.approval_rate, 1.0);
        assert_eq!(result.participation_rate, 0.75);
        assert_eq!(result.rounds, 1);
        bft.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_of_four_expires() {
        let bft = council(4).await;
        let config = CouncilConfig { timeout_ms: Some(2_000), ..Default::default() };
        bft.initialize(Some(&config)).await.unwrap();

        let proposal = bft.propose(json!("short")).await.unwrap();
        bft.vote(&proposal.id, seal("n0", true)).await.unwrap();
        bft.vote(&proposal.id, seal("n1", true)).await.unwrap();

        let result = bft.await_consensus(&proposal.id).await.unwrap();
        assert!(!result.approved);
        assert_eq!(bft.proposal(&proposal.id).await.unwrap().status, ProposalStatus::Expired);
        bft.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shrinking_council_settles_open_proposal() {
        let bft = council(4).await;
        bft.initialize(None).await.unwrap();
        let proposal = bft.propose(json!("fewer seats")).await.unwrap();
        bft.vote(&proposal.id, seal("n0", true)).await.unwrap();
        bft.vote(&proposal.id, seal("n1", true)).await.unwrap();
        assert_eq!(bft.proposal(&proposal.id).await.unwrap().status, ProposalStatus::Pending);

        // Three members tolerate no fault, so 2f+1 drops to one.
        bft.remove_node(&NodeId::from("n3")).await.unwrap();
        assert_eq!(bft.max_faulty_nodes().await, 0);

        let started = Instant::now();
        let result = bft.await_consensus(&proposal.id).await.unwrap();
        assert!(result.approved);
        assert_eq!(bft.proposal(&proposal.id).await.unwrap().status, ProposalStatus::Accepted);
        assert!(started.elapsed() < Duration::from_secs(1));
        bft.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_member_vote_is_withdrawn() {
        let bft = council(4).await;
        let proposal = bft.propose(json!("withdraw")).await.unwrap();
        bft.vote(&proposal.id, seal("n3", false)).await.unwrap();

        bft.remove_node(&NodeId::from("n3")).await.unwrap();
        bft.add_node(NodeId::from("n3"), &AddNodeOptions::default()).await.unwrap();
        assert!(bft.proposal(&proposal.id).await.unwrap().votes.is_empty());
        bft.vote(&proposal.id, seal("n3", true)).await.unwrap();
        assert_eq!(bft.proposal(&proposal.id).await.unwrap().votes.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_replica_cannot_propose() {
        let bft = council(1).await;
        bft.add_node(NodeId::from("boss"), &AddNodeOptions::primary()).await.unwrap();
        let err = bft.propose(json!(1)).await.unwrap_err();
        assert!(matches!(err, CouncilError::NotPrimary { primary: Some(ref p) } if p.as_str() == "boss"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_view_change_keeps_collected_seals() {
        let bft = council(4).await;
        let proposal = bft.propose(json!("carry")).await.unwrap();
        bft.vote(&proposal.id, seal("n0", true)).await.unwrap();
        bft.vote(&proposal.id, seal("n1", true)).await.unwrap();

        let primary = bft.initiate_view_change().await;
        assert_eq!(primary, NodeId::from("n1"));
        assert_eq!(bft.view_number().await, 1);
        assert!(!bft.is_primary().await);
        assert_eq!(bft.proposal(&proposal.id).await.unwrap().votes.len(), 2);

        bft.vote(&proposal.id, seal("n2", true)).await.unwrap();
        let result = bft.await_consensus(&proposal.id).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.rounds, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicting_pre_prepare_is_equivocation() {
        let bft = council(1).await;
        let boss = NodeId::from("boss");
        bft.add_node(boss.clone(), &AddNodeOptions::primary()).await.unwrap();
        let mut events = bft.subscribe();

        let honest = Proposal::new("bft_a".into(), boss.clone(), json!("a"), 0);
        assert!(bft.handle_pre_prepare(&boss, 0, 1, &digest_of(&json!("a"), 1), honest.clone()).await);
        assert!(bft.handle_pre_prepare(&boss, 0, 1, &digest_of(&json!("a"), 1), honest).await);

        let forged = Proposal::new("bft_b".into(), boss.clone(), json!("b"), 0);
        assert!(!bft.handle_pre_prepare(&boss, 0, 1, &digest_of(&json!("b"), 1), forged).await);

        assert_eq!(
            events.recv().await.unwrap(),
            CouncilEvent::EquivocationDetected { offender: boss.clone(), view: 0, sequence: 1 }
        );
        assert_eq!(bft.view_number().await, 1);
        assert_ne!(bft.primary_id().await, boss);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tampered_digest_is_refused() {
        let bft = council(1).await;
        let boss = NodeId::from("boss");
        bft.add_node(boss.clone(), &AddNodeOptions::primary()).await.unwrap();
        let proposal = Proposal::new("bft_x".into(), boss.clone(), json!("x"), 0);
        assert!(!bft.handle_pre_prepare(&boss, 0, 1, "deadbeef", proposal).await);
        assert_eq!(bft.view_number().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_primary_is_replaced() {
        let bft = council(3).await;
        bft.add_node(NodeId::from("boss"), &AddNodeOptions::primary()).await.unwrap();
        bft.initialize(None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert!(bft.view_number().await >= 1);
        assert_ne!(bft.primary_id().await, NodeId::from("boss"));
        bft.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removing_primary_promotes_next() {
        let bft = council(3).await;
        bft.add_node(NodeId::from("boss"), &AddNodeOptions::primary()).await.unwrap();
        bft.remove_node(&NodeId::from("boss")).await.unwrap();
        assert_eq!(bft.view_number().await, 1);
        assert!(bft.is_primary().await);
    }
}
