//! gossip.rs
//!
//! Coordinator-free gossip behind `whisper`. Every member keeps its own view
//! of each proposal's votes; views spread by push-pull exchanges with a few
//! random peers per round. The local node's view is what gets decided on.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::Value;
use tokio::{
    sync::{broadcast, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, info};

use council_common::{
    BallotBox, CouncilConfig, CouncilError, NodeId, Proposal, ProposalResult, ProposalStatus, Result,
    Vote,
};

use super::{admit_vote, close_proposal, new_id, withdraw_votes, LegacyConsensus, ProposalPool, Progress, Wake};
use crate::{
    evaluator::{meets_quorum, Tally},
    events::{CouncilEvent, EventBus},
    pool::Tracked,
    registry::{AddNodeOptions, NodeRegistry, RegistryCommand, RegistryEvent},
    timers::TimerSet,
    transport::{CouncilMessage, CouncilReply, Transport},
};

pub const PROTOCOL: &str = "whisper";

#[derive(Debug, Clone)]
pub struct GossipOptions {
    pub fanout: usize,
    pub gossip_interval: Duration,
    pub max_rounds: u32,
    /// Rounds the observed participation must hold still to converge.
    pub convergence_rounds: u32,
    pub approval_threshold: f64,
    pub min_participation: f64,
    /// Upper bound for a proposal even if the ticker never runs.
    pub proposal_timeout: Duration,
}

impl Default for GossipOptions {
    fn default() -> Self {
        Self {
            fanout: 3,
            gossip_interval: Duration::from_millis(100),
            max_rounds: 20,
            convergence_rounds: 3,
            approval_threshold: 0.5,
            min_participation: 0.0,
            proposal_timeout: Duration::from_millis(council_common::config::DEFAULT_CONSENSUS_TIMEOUT_MS),
        }
    }
}

impl GossipOptions {
    fn apply(&mut self, config: &CouncilConfig) {
        if let Some(fanout) = config.fanout {
            self.fanout = fanout;
        }
        if let Some(ms) = config.gossip_interval_ms {
            self.gossip_interval = Duration::from_millis(ms);
        }
        if let Some(rounds) = config.max_rounds {
            self.max_rounds = rounds;
        }
        if let Some(ratio) = config.quorum_ratio {
            self.approval_threshold = ratio;
        }
        if let Some(min) = config.min_participation {
            self.min_participation = min;
        }
        if let Some(ms) = config.timeout_ms {
            self.proposal_timeout = Duration::from_millis(ms);
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Convergence {
    rounds: u32,
    last_participation: f64,
    stable_rounds: u32,
}

type Views = HashMap<NodeId, BallotBox<Vote>>;

struct State {
    members: NodeRegistry,
    pool: ProposalPool,
    /// Proposal id -> member -> that member's view of the votes.
    views: HashMap<String, Views>,
    convergence: HashMap<String, Convergence>,
    version: u64,
    options: GossipOptions,
    initialized: bool,
}

impl State {
    /// Drops the views held by non-members and their ballots from every view.
    fn forget_departed(&mut self) {
        let members = &self.members;
        for views in self.views.values_mut() {
            views.retain(|owner, _| members.contains(owner));
            for view in views.values_mut() {
                let departed: Vec<NodeId> = view
                    .iter()
                    .map(|(voter, _)| voter.clone())
                    .filter(|voter| !members.contains(voter))
                    .collect();
                for voter in &departed {
                    view.withdraw(voter);
                }
            }
        }
    }
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
pub struct GossipPropagation {
    shared: Arc<Shared>,
}

fn sample_peers(members: &[NodeId], of: &NodeId, fanout: usize) -> Vec<NodeId> {
    let peers: Vec<&NodeId> = members.iter().filter(|m| *m != of).collect();
    peers
        .choose_multiple(&mut rand::thread_rng(), fanout)
        .map(|p| (*p).clone())
        .collect()
}

impl GossipPropagation {
    pub fn new(node_id: NodeId, options: GossipOptions, transport: Arc<dyn Transport>) -> Self {
        let mut members = NodeRegistry::new();
        members.handle_command(RegistryCommand::Register(node_id.clone(), AddNodeOptions::default()));

        let state = State {
            members,
            pool: ProposalPool::new(),
            views: HashMap::new(),
            convergence: HashMap::new(),
            version: 0,
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

    /// Number of proposals made by this node.
    pub async fn version(&self) -> u64 {
        self.shared.state.lock().await.version
    }

    /// Participation currently observed by the local node.
    pub async fn convergence(&self, id: &str) -> Option<f64> {
        let state = self.shared.state.lock().await;
        let local = state.views.get(id)?.get(&self.shared.node_id).cloned().unwrap_or_default();
        Some(Tally::count(&local, &state.members).participation_rate())
    }

    pub async fn rounds_run(&self, id: &str) -> u32 {
        self.shared.state.lock().await.convergence.get(id).map(|c| c.rounds).unwrap_or(0)
    }

    /// Runs one push-pull round for every unsettled proposal.
    pub async fn run_round(&self) {
        self.shared.gossip_round().await;
    }
}

impl Shared {
    async fn gossip_round(&self) {
        let plan: Vec<(String, NodeId, NodeId, BallotBox<Vote>)> = {
            let state = self.state.lock().await;
            let ids = state.members.ids();
            let mut plan = Vec::new();
            for proposal_id in state.pool.unsettled_ids() {
                let Some(views) = state.views.get(&proposal_id) else {
                    continue;
                };
                for member in &ids {
                    let view = views.get(member).cloned().unwrap_or_default();
                    for peer in sample_peers(&ids, member, state.options.fanout) {
                        plan.push((proposal_id.clone(), member.clone(), peer, view.clone()));
                    }
                }
            }
            plan
        };

        let mut delivered = Vec::with_capacity(plan.len());
        for (proposal_id, from, to, votes) in plan {
            let message = CouncilMessage::GossipDigest { proposal_id: proposal_id.clone(), votes };
            match self.transport.request(&from, &to, message).await {
                Ok(CouncilReply::Digest { votes, .. }) => delivered.push((proposal_id, from, to, votes)),
                Ok(other) => debug!("unexpected gossip reply from {}: {:?}", to, other),
                Err(e) => debug!("gossip {} -> {} skipped: {}", from, to, e),
            }
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        for (proposal_id, from, to, reply) in delivered {
            let Some(views) = state.views.get_mut(&proposal_id) else {
                continue;
            };
            let pushed = views.get(&from).cloned().unwrap_or_default();
            let target = views.entry(to).or_default();
            target.merge(&pushed);
            let pulled = target.clone();
            let source = views.entry(from).or_default();
            source.merge(&pulled);
            source.merge(&reply);
        }
        state.forget_departed();

        for proposal_id in state.pool.unsettled_ids() {
            self.finish_round(state, &proposal_id);
        }
        self.sweep_expired(state);
        drop(guard);
        self.progress.bump();
    }

    /// Publishes the local view of `id` and checks for convergence.
    fn finish_round(&self, state: &mut State, id: &str) {
        let local = state
            .views
            .get(id)
            .and_then(|v| v.get(&self.node_id))
            .cloned()
            .unwrap_or_default();
        let tally = Tally::count(&local, &state.members);
        let participation = tally.participation_rate();

        let conv = state.convergence.entry(id.to_string()).or_default();
        conv.rounds += 1;
        if (participation - conv.last_participation).abs() < f64::EPSILON {
            conv.stable_rounds += 1;
        } else {
            conv.stable_rounds = 0;
            conv.last_participation = participation;
        }
        let conv = *conv;

        self.events.emit(CouncilEvent::GossipRoundComplete {
            id: id.to_string(),
            round: conv.rounds,
            participation_rate: participation,
        });
        debug!("gossip round {} for {}: participation {:.2}", conv.rounds, id, participation);

        let options = &state.options;
        let converged = conv.stable_rounds >= options.convergence_rounds
            && tally.sealed() > 0
            && participation >= options.min_participation;
        let status = if converged {
            Some(if meets_quorum(tally.approval_rate(), options.approval_threshold) {
                ProposalStatus::Accepted
            } else {
                ProposalStatus::Rejected
            })
        } else if conv.rounds >= options.max_rounds {
            Some(ProposalStatus::Expired)
        } else {
            None
        };

        let Some(tracked) = state.pool.find_by_id_mut(id) else {
            return;
        };
        tracked.item.votes = local;
        tracked.rounds = conv.rounds;

        match status {
            Some(ProposalStatus::Expired) => {
                close_proposal(tracked, &state.members, ProposalStatus::Expired);
                info!(target: "consensus", "EVENT:EXPIRED id={} rounds={}", id, conv.rounds);
                self.events.emit(CouncilEvent::Expired { id: id.to_string() });
            }
            Some(status) => {
                let result = close_proposal(tracked, &state.members, status);
                info!(
                    target: "consensus",
                    "EVENT:CONVERGED id={} approved={} rounds={} participation={:.2}",
                    id, result.approved, conv.rounds, participation
                );
                self.events.emit(CouncilEvent::QuorumReached { id: id.to_string(), approved: result.approved });
            }
            None => {}
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
        Some(result)
    }

    fn sweep_expired(&self, state: &mut State) {
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
    }
}

#[async_trait]
impl LegacyConsensus for GossipPropagation {
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
        let interval = {
            let mut state = self.shared.state.lock().await;
            if let Some(config) = config {
                config.validate()?;
                state.options.apply(config);
            }
            if state.initialized {
                return Ok(());
            }
            state.initialized = true;
            state.options.gossip_interval
        };
        info!("{} initialized as {} (every {:?})", self.shared.node_id, PROTOCOL, interval);
        self.shared.events.emit(CouncilEvent::Initialized {
            node_id: self.shared.node_id.clone(),
            protocol: PROTOCOL.to_string(),
        });

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared
            .timers
            .every(interval, None, move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.gossip_round().await;
                    }
                }
            })
            .await;
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
        let event = self
            .shared
            .state
            .lock()
            .await
            .members
            .handle_command(RegistryCommand::Register(id, opts.clone()));
        debug!("{}: {:?}", self.shared.node_id, event);
        self.shared.progress.bump();
        Ok(event)
    }

    async fn remove_node(&self, id: &NodeId) -> Result<RegistryEvent> {
        self.shared.progress.ensure_open()?;
        let event = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let event = state.members.handle_command(RegistryCommand::Drop(id.clone()));
            if matches!(event, RegistryEvent::Dropped(_)) {
                state.forget_departed();
                withdraw_votes(&mut state.pool, id);
            }
            event
        };
        debug!("{}: {:?}", self.shared.node_id, event);
        self.shared.progress.bump();
        Ok(event)
    }

    async fn propose(&self, value: Value) -> Result<Proposal> {
        self.shared.progress.ensure_open()?;
        let proposal = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            state.version += 1;
            let proposal = Proposal::new(new_id("gossip"), self.shared.node_id.clone(), value, state.version);
            state.views.insert(proposal.id.clone(), Views::new());
            state.convergence.insert(proposal.id.clone(), Convergence::default());
            state.pool.add(proposal.id.clone(), Tracked::new(proposal.clone(), state.options.proposal_timeout));
            proposal
        };
        info!(target: "consensus", "EVENT:PROPOSE id={} proposer={} version={}", proposal.id, proposal.proposer_id, proposal.term);
        self.shared.events.emit(CouncilEvent::Proposed {
            id: proposal.id.clone(),
            protocol: PROTOCOL.to_string(),
        });
        self.shared.progress.bump();
        Ok(proposal)
    }

    async fn vote(&self, proposal_id: &str, vote: Vote) -> Result<()> {
        self.shared.progress.ensure_open()?;
        let (voter, approve) = (vote.voter_id.clone(), vote.approve);
        {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let tracked = admit_vote(&mut state.pool, &state.members, proposal_id, &vote)?;
            let own_view = state
                .views
                .entry(proposal_id.to_string())
                .or_default()
                .entry(voter.clone())
                .or_default();
            own_view.cast(proposal_id, vote)?;
            if voter == self.shared.node_id {
                tracked.item.votes = own_view.clone();
            }
        }
        info!(target: "consensus", "EVENT:VOTE proposal_id={} voter={} approve={}", proposal_id, voter, approve);
        self.shared.events.emit(CouncilEvent::SealRecorded { id: proposal_id.to_string(), voter, approve });
        self.shared.progress.bump();
        Ok(())
    }

    async fn await_consensus(&self, proposal_id: &str) -> Result<ProposalResult> {
        let progress = &self.shared.progress;
        let mut rx = progress.watch();
        loop {
            progress.ensure_open()?;
            let deadline = {
                let state = self.shared.state.lock().await;
                let tracked = state
                    .pool
                    .find_by_id(proposal_id)
                    .ok_or_else(|| CouncilError::UnknownPetition(proposal_id.to_string()))?;
                if let Some(result) = &tracked.result {
                    return Ok(result.clone());
                }
                tracked.deadline
            };

            if progress.wait(&mut rx, deadline).await? == Wake::Deadline {
                progress.ensure_open()?;
                let mut guard = self.shared.state.lock().await;
                let result = self.shared.expire(&mut guard, proposal_id);
                drop(guard);
                progress.bump();
                return result.ok_or_else(|| CouncilError::UnknownPetition(proposal_id.to_string()));
            }
        }
    }

    async fn proposal(&self, id: &str) -> Option<Proposal> {
        self.shared.state.lock().await.pool.find_by_id(id).map(|t| t.item.clone())
    }

    async fn prune(&self, id: &str) -> bool {
        let mut state = self.shared.state.lock().await;
        state.views.remove(id);
        state.convergence.remove(id);
        state.pool.remove(id).is_some()
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

    async fn network(size: usize, config: CouncilConfig, transport: Arc<LoopbackTransport>) -> GossipPropagation {
        let gossip = GossipPropagation::new(NodeId::from("n0"), GossipOptions::default(), transport);
        for i in 1..size {
            gossip.add_node(NodeId(format!("n{}", i)), &AddNodeOptions::default()).await.unwrap();
        }
        gossip.initialize(Some(&config)).await.unwrap();
        gossip
    }

    async fn everyone_votes(gossip: &GossipPropagation, id: &str, size: usize) {
        for i in 0..size {
            gossip.vote(id, Vote::new(NodeId(format!("n{}", i)), true, 1.0)).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_participation_converges() {
        let config = CouncilConfig { fanout: Some(2), gossip_interval_ms: Some(50), ..Default::default() };
        let gossip = network(5, config, Arc::new(LoopbackTransport::new())).await;

        let proposal = gossip.propose(json!({"rumor": true})).await.unwrap();
        assert!(proposal.id.starts_with("gossip_"));
        assert_eq!(gossip.version().await, 1);
        everyone_votes(&gossip, &proposal.id, 5).await;

        let result = gossip.await_consensus(&proposal.id).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.participation_rate, 1.0);
        assert!(result.rounds >= 3 && result.rounds <= 20);
        assert_eq!(gossip.convergence(&proposal.id).await, Some(1.0));
        gossip.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_vote_lands_in_voters_own_view() {
        let config = CouncilConfig { gossip_interval_ms: Some(1_000), ..Default::default() };
        let gossip = network(3, config, Arc::new(LoopbackTransport::new())).await;
        let proposal = gossip.propose(json!(1)).await.unwrap();

        gossip.vote(&proposal.id, Vote::new(NodeId::from("n1"), true, 1.0)).await.unwrap();
        assert!(gossip.proposal(&proposal.id).await.unwrap().votes.is_empty());
        assert_eq!(gossip.convergence(&proposal.id).await, Some(0.0));

        let dup = gossip.vote(&proposal.id, Vote::new(NodeId::from("n1"), false, 1.0)).await;
        assert!(matches!(dup, Err(CouncilError::DuplicateSeal { .. })));

        gossip.run_round().await;
        assert_eq!(gossip.rounds_run(&proposal.id).await, 1);
        gossip.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_member_vote_leaves_every_view() {
        let config = CouncilConfig { fanout: Some(2), gossip_interval_ms: Some(1_000), ..Default::default() };
        let gossip = network(3, config, Arc::new(LoopbackTransport::new())).await;
        let proposal = gossip.propose(json!("leaving")).await.unwrap();
        gossip.vote(&proposal.id, Vote::new(NodeId::from("n2"), false, 1.0)).await.unwrap();
        gossip.run_round().await;
        assert_eq!(gossip.convergence(&proposal.id).await, Some(1.0 / 3.0));

        gossip.remove_node(&NodeId::from("n2")).await.unwrap();
        assert_eq!(gossip.convergence(&proposal.id).await, Some(0.0));
        gossip.add_node(NodeId::from("n2"), &AddNodeOptions::default()).await.unwrap();
        assert_eq!(gossip.convergence(&proposal.id).await, Some(0.0));

        gossip.vote(&proposal.id, Vote::new(NodeId::from("n2"), true, 1.0)).await.unwrap();
        gossip.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_isolated_peer_never_reaches_local_view() {
        let transport = Arc::new(LoopbackTransport::new());
        transport.isolate(&NodeId::from("n4")).await;
        let config = CouncilConfig { fanout: Some(4), gossip_interval_ms: Some(50), ..Default::default() };
        let gossip = network(5, config, transport).await;

        let proposal = gossip.propose(json!("partitioned")).await.unwrap();
        everyone_votes(&gossip, &proposal.id, 5).await;

        let result = gossip.await_consensus(&proposal.id).await.unwrap();
        assert!(result.approved);
        assert!(result.participation_rate < 1.0);
        assert_eq!(result.participation_rate, 0.8);
        gossip.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_expires_after_max_rounds() {
        let config = CouncilConfig { gossip_interval_ms: Some(50), max_rounds: Some(5), ..Default::default() };
        let gossip = network(3, config, Arc::new(LoopbackTransport::new())).await;
        let proposal = gossip.propose(json!("nobody cares")).await.unwrap();

        let result = gossip.await_consensus(&proposal.id).await.unwrap();
        assert!(!result.approved);
        assert_eq!(result.rounds, 5);
        assert_eq!(gossip.proposal(&proposal.id).await.unwrap().status, ProposalStatus::Expired);
        gossip.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_uninitialized_engine_still_times_out() {
        let gossip = GossipPropagation::new(
            NodeId::from("n0"),
            GossipOptions { proposal_timeout: Duration::from_millis(500), ..Default::default() },
            Arc::new(LoopbackTransport::new()),
        );
        let proposal = gossip.propose(json!(0)).await.unwrap();
        let result = gossip.await_consensus(&proposal.id).await.unwrap();
        assert!(!result.approved);
        assert_eq!(gossip.proposal(&proposal.id).await.unwrap().status, ProposalStatus::Expired);
    }
}
