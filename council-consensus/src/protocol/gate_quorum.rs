//! gate_quorum.rs
//!
//! The native weighted quorum and the default protocol. Members vote with
//! the weight of their guardian tag (frequency / 174), scaled by each seal's
//! confidence. A petition is approved when the weighted approval ratio is
//! strictly above `quorum_ratio` and enough members took part.

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::{
    sync::{broadcast, Mutex},
    time::{Duration, Instant},
};
use tracing::{debug, info};

use council_common::{
    ConsensusResult, CouncilConfig, CouncilError, Element, Guardian, NodeId, Petition, PetitionStatus,
    Result, Seal,
};

use super::{new_id, Progress, Wake};
use crate::{
    evaluator::{ConsensusEvaluator, QuorumPolicy, WeightedTally},
    events::{CouncilEvent, EventBus},
    pool::{PetitionPool, Tracked},
    registry::{AddNodeOptions, NodeRegistry, RegistryCommand, RegistryEvent},
    timers::TimerSet,
};

pub const PROTOCOL: &str = "gate-quorum";

#[derive(Debug, Clone)]
pub struct GateQuorumOptions {
    pub quorum_ratio: f64,
    pub min_participation: f64,
    pub vote_timeout: Duration,
    /// Decide as soon as this many members have sealed.
    pub quorum_size: Option<usize>,
    pub weight_by_frequency: bool,
    pub element_affinity: Option<Element>,
    /// Let the shinkami seal decide on its own.
    pub source_override: bool,
}

impl Default for GateQuorumOptions {
    fn default() -> Self {
        Self {
            quorum_ratio: council_common::config::DEFAULT_QUORUM_RATIO,
            min_participation: 0.5,
            vote_timeout: Duration::from_millis(council_common::config::DEFAULT_CONSENSUS_TIMEOUT_MS),
            quorum_size: None,
            weight_by_frequency: true,
            element_affinity: None,
            source_override: false,
        }
    }
}

impl GateQuorumOptions {
    fn apply(&mut self, config: &CouncilConfig) {
        if let Some(ratio) = config.quorum_ratio {
            self.quorum_ratio = ratio;
        }
        if let Some(min) = config.min_participation {
            self.min_participation = min;
        }
        if let Some(ms) = config.timeout_ms {
            self.vote_timeout = Duration::from_millis(ms);
        }
    }

    fn evaluator(&self) -> ConsensusEvaluator {
        ConsensusEvaluator::new(QuorumPolicy {
            ratio: self.quorum_ratio,
            min_participation: self.min_participation,
            weight_by_frequency: self.weight_by_frequency,
            element_affinity: self.element_affinity,
        })
    }
}

type Pool = PetitionPool<Petition, ConsensusResult>;

struct State {
    members: NodeRegistry,
    pool: Pool,
    options: GateQuorumOptions,
    initialized: bool,
}

struct Shared {
    node_id: NodeId,
    state: Mutex<State>,
    progress: Progress,
    events: EventBus,
    timers: TimerSet,
}

#[derive(Clone)]
pub struct GateQuorum {
    shared: Arc<Shared>,
}

fn close_petition(
    tracked: &mut Tracked<Petition, ConsensusResult>,
    tally: &WeightedTally,
    status: PetitionStatus,
) -> ConsensusResult {
    tracked.item.status = status;
    let result = ConsensusResult {
        petition_id: tracked.item.id.clone(),
        approved: status == PetitionStatus::Committed,
        approval_rate: tally.ratio(),
        participation_rate: tally.participation_rate(),
        final_value: tracked.item.value.clone(),
        rounds: tracked.rounds,
        duration_ms: tracked.elapsed_ms(),
    };
    tracked.result = Some(result.clone());
    result
}

impl GateQuorum {
    /// The local node petitions; only nodes added later vote.
    pub fn new(node_id: NodeId, options: GateQuorumOptions) -> Self {
        let state = State {
            members: NodeRegistry::new(),
            pool: Pool::new(),
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
            }),
        }
    }

    pub fn protocol(&self) -> &'static str {
        PROTOCOL
    }

    pub fn node_id(&self) -> &NodeId {
        &self.shared.node_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.shared.events.subscribe()
    }

    pub async fn initialize(&self, config: Option<&CouncilConfig>) -> Result<()> {
        self.shared.progress.ensure_open()?;
        let sweep_every = {
            let mut state = self.shared.state.lock().await;
            if let Some(config) = config {
                config.validate()?;
                state.options.apply(config);
            }
            if state.initialized {
                return Ok(());
            }
            state.initialized = true;
            (state.options.vote_timeout / 4).max(Duration::from_millis(10))
        };
        info!("{} initialized as {}", self.shared.node_id, PROTOCOL);
        self.shared.events.emit(CouncilEvent::Initialized {
            node_id: self.shared.node_id.clone(),
            protocol: PROTOCOL.to_string(),
        });

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared
            .timers
            .every(sweep_every, None, move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.sweep_expired().await;
                    }
                }
            })
            .await;
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shared.progress.close();
        self.shared.timers.cancel_all().await;
        info!("{} shut down", self.shared.node_id);
        self.shared.events.emit(CouncilEvent::Shutdown {
            node_id: self.shared.node_id.clone(),
            protocol: PROTOCOL.to_string(),
        });
    }

    pub async fn add_node(&self, id: NodeId, opts: &AddNodeOptions) -> Result<RegistryEvent> {
        self.shared.progress.ensure_open()?;
        let event = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let event = state.members.handle_command(RegistryCommand::Register(id, opts.clone()));
            self.shared.decide_unsettled(state);
            event
        };
        debug!("{}: {:?}", self.shared.node_id, event);
        self.shared.progress.bump();
        Ok(event)
    }

    /// Drops `id` from the council. Its seals on open petitions are
    /// withdrawn and those petitions are re-evaluated under the new membership.
    pub async fn remove_node(&self, id: &NodeId) -> Result<RegistryEvent> {
        self.shared.progress.ensure_open()?;
        let event = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let event = state.members.handle_command(RegistryCommand::Drop(id.clone()));
            if matches!(event, RegistryEvent::Dropped(_)) {
                for (_, tracked) in state.pool.iter_mut() {
                    if !tracked.is_settled() {
                        tracked.item.seals.withdraw(id);
                    }
                }
            }
            self.shared.decide_unsettled(state);
            event
        };
        debug!("{}: {:?}", self.shared.node_id, event);
        self.shared.progress.bump();
        Ok(event)
    }

    pub async fn propose(&self, value: Value) -> Result<Petition> {
        self.shared.progress.ensure_open()?;
        let petition = {
            let mut state = self.shared.state.lock().await;
            let petition = Petition::new(new_id("gq"), self.shared.node_id.clone(), value, 1);
            let timeout = state.options.vote_timeout;
            state.pool.add(petition.id.clone(), Tracked::new(petition.clone(), timeout));
            petition
        };
        info!(target: "consensus", "EVENT:PROPOSE id={} proposer={}", petition.id, petition.petitioner_id);
        self.shared.events.emit(CouncilEvent::Proposed {
            id: petition.id.clone(),
            protocol: PROTOCOL.to_string(),
        });
        self.shared.progress.bump();
        Ok(petition)
    }

    pub async fn vote(&self, petition_id: &str, seal: Seal) -> Result<()> {
        self.shared.progress.ensure_open()?;
        seal.validate()?;
        let (voter, approve) = (seal.voter_id.clone(), seal.approve);
        {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let tracked = state
                .pool
                .find_by_id_mut(petition_id)
                .ok_or_else(|| CouncilError::UnknownPetition(petition_id.to_string()))?;
            if tracked.item.status.is_terminal() {
                return Err(CouncilError::PetitionClosed {
                    petition_id: petition_id.to_string(),
                    status: tracked.item.status,
                });
            }
            if !state.members.contains(&voter) {
                return Err(CouncilError::UnknownNode(voter));
            }
            tracked.item.seals.cast(petition_id, seal)?;

            info!(target: "consensus", "EVENT:VOTE proposal_id={} voter={} approve={}", petition_id, voter, approve);
            self.shared.events.emit(CouncilEvent::SealRecorded {
                id: petition_id.to_string(),
                voter,
                approve,
            });
            self.shared.decide(state, petition_id);
        }
        self.shared.progress.bump();
        Ok(())
    }

    pub async fn await_consensus(&self, petition_id: &str) -> Result<ConsensusResult> {
        let progress = &self.shared.progress;
        let mut rx = progress.watch();
        loop {
            progress.ensure_open()?;
            let deadline = {
                let mut guard = self.shared.state.lock().await;
                let state = &mut *guard;
                let tracked = state
                    .pool
                    .find_by_id(petition_id)
                    .ok_or_else(|| CouncilError::UnknownPetition(petition_id.to_string()))?;
                if let Some(result) = &tracked.result {
                    return Ok(result.clone());
                }
                let deadline = tracked.deadline;
                if let Some(result) = self.shared.decide(state, petition_id) {
                    progress.bump();
                    return Ok(result);
                }
                deadline
            };

            if progress.wait(&mut rx, deadline).await? == Wake::Deadline {
                progress.ensure_open()?;
                let mut guard = self.shared.state.lock().await;
                let result = self.shared.expire(&mut guard, petition_id);
                drop(guard);
                progress.bump();
                return result.ok_or_else(|| CouncilError::UnknownPetition(petition_id.to_string()));
            }
        }
    }

    pub async fn petition(&self, id: &str) -> Option<Petition> {
        self.shared.state.lock().await.pool.find_by_id(id).map(|t| t.item.clone())
    }

    pub async fn prune(&self, id: &str) -> bool {
        self.shared.state.lock().await.pool.remove(id).is_some()
    }

    pub async fn petitions(&self) -> Vec<Petition> {
        self.shared.state.lock().await.pool.items().cloned().collect()
    }

    pub async fn results(&self) -> Vec<ConsensusResult> {
        self.shared.state.lock().await.pool.results().cloned().collect()
    }

    /// Voting weight `id` would carry right now, 0 for non-members.
    pub async fn weight_of(&self, id: &NodeId) -> f64 {
        let state = self.shared.state.lock().await;
        state.options.evaluator().member_weight(&state.members, id)
    }
}

impl Shared {
    fn decide(&self, state: &mut State, id: &str) -> Option<ConsensusResult> {
        let evaluator = state.options.evaluator();
        let tracked = state.pool.find_by_id_mut(id)?;
        if let Some(result) = &tracked.result {
            return Some(result.clone());
        }

        let tally = evaluator.tally(&tracked.item.seals, &state.members);

        if state.options.source_override {
            let source = state
                .members
                .members()
                .iter()
                .find(|m| m.guardian() == Some(Guardian::Shinkami))
                .and_then(|m| tracked.item.seals.get(&m.id));
            if let Some(seal) = source {
                let status = if seal.approve { PetitionStatus::Committed } else { PetitionStatus::Rejected };
                let result = close_petition(tracked, &tally, status);
                info!(target: "consensus", "EVENT:COMMIT id={} approved={} override=shinkami", id, result.approved);
                self.events.emit(CouncilEvent::QuorumReached { id: id.to_string(), approved: result.approved });
                return Some(result);
            }
        }

        let everyone = !state.members.is_empty() && tally.sealed >= state.members.len();
        let enough = state.options.quorum_size.map_or(false, |q| tally.sealed >= q);
        if !(everyone || enough) {
            return None;
        }

        let status = if evaluator.approves(&tally) {
            PetitionStatus::Committed
        } else {
            PetitionStatus::Rejected
        };
        let result = close_petition(tracked, &tally, status);
        info!(
            target: "consensus",
            "EVENT:COMMIT id={} approved={} ratio={:.3} participation={:.2}",
            id, result.approved, result.approval_rate, result.participation_rate
        );
        self.events.emit(CouncilEvent::QuorumReached { id: id.to_string(), approved: result.approved });
        Some(result)
    }

    fn decide_unsettled(&self, state: &mut State) {
        for id in state.pool.unsettled_ids() {
            self.decide(state, &id);
        }
    }

    fn expire(&self, state: &mut State, id: &str) -> Option<ConsensusResult> {
        let evaluator = state.options.evaluator();
        let tracked = state.pool.find_by_id_mut(id)?;
        if let Some(result) = &tracked.result {
            return Some(result.clone());
        }
        let tally = evaluator.tally(&tracked.item.seals, &state.members);
        let result = close_petition(tracked, &tally, PetitionStatus::Expired);
        info!(target: "consensus", "EVENT:EXPIRED id={}", id);
        self.events.emit(CouncilEvent::Expired { id: id.to_string() });
        Some(result)
    }

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let expired = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let due: Vec<String> = state
                .pool
                .unsettled_ids()
                .into_iter()
                .filter(|id| state.pool.find_by_id(id).map_or(false, |t| t.deadline <= now))
                .collect();
            for id in &due {
                self.expire(state, id);
            }
            !due.is_empty()
        };
        if expired {
            self.progress.bump();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn quorum(members: &[(&str, Option<&str>)], options: GateQuorumOptions) -> GateQuorum {
        let gq = GateQuorum::new(NodeId::from("petitioner"), options);
        for (id, tag) in members {
            let opts = AddNodeOptions { is_primary: false, weight_tag: tag.map(str::to_string) };
            gq.add_node(NodeId::from(*id), &opts).await.unwrap();
        }
        gq
    }

    fn seal(voter: &str, approve: bool) -> Seal {
        Seal::new(NodeId::from(voter), approve, 1.0)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratio_exactly_at_threshold_is_rejected() {
        let gq = quorum(&[("a", None), ("b", None), ("c", None)], GateQuorumOptions::default()).await;
        let petition = gq.propose(json!("tie")).await.unwrap();
        assert!(petition.id.starts_with("gq_"));
        assert_eq!(petition.status, PetitionStatus::Pending);
        assert!(petition.seals.is_empty());

        gq.vote(&petition.id, seal("a", true)).await.unwrap();
        gq.vote(&petition.id, seal("b", true)).await.unwrap();
        gq.vote(&petition.id, seal("c", false)).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert!((result.approval_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(gq.petition(&petition.id).await.unwrap().status, PetitionStatus::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ratio_above_threshold_is_approved() {
        let gq = quorum(&[("a", None), ("b", None), ("c", None)], GateQuorumOptions::default()).await;
        let petition = gq.propose(json!("clear")).await.unwrap();
        for voter in ["a", "b", "c"] {
            gq.vote(&petition.id, seal(voter, true)).await.unwrap();
        }
        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.approval_rate, 1.0);
        assert_eq!(result.participation_rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heavier_minority_wins() {
        let members = [("source", Some("shinkami")), ("earth", Some("lyssandria")), ("water", Some("leyla"))];
        let gq = quorum(&members, GateQuorumOptions::default()).await;
        let petition = gq.propose(json!("ascend")).await.unwrap();
        gq.vote(&petition.id, seal("source", true)).await.unwrap();
        gq.vote(&petition.id, seal("earth", false)).await.unwrap();
        gq.vote(&petition.id, seal("water", false)).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(result.approved);

        let flat = quorum(&members, GateQuorumOptions { weight_by_frequency: false, ..Default::default() }).await;
        let petition = flat.propose(json!("ascend")).await.unwrap();
        flat.vote(&petition.id, seal("source", true)).await.unwrap();
        flat.vote(&petition.id, seal("earth", false)).await.unwrap();
        flat.vote(&petition.id, seal("water", false)).await.unwrap();
        assert!(!flat.await_consensus(&petition.id).await.unwrap().approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_participation_rejects() {
        let options = GateQuorumOptions { quorum_size: Some(1), ..Default::default() };
        let gq = quorum(&[("a", None), ("b", None), ("c", None), ("d", None)], options).await;
        let petition = gq.propose(json!("quiet")).await.unwrap();
        gq.vote(&petition.id, seal("a", true)).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert_eq!(result.participation_rate, 0.25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confidence_scales_weight() {
        let gq = quorum(&[("a", None), ("b", None)], GateQuorumOptions::default()).await;
        let petition = gq.propose(json!("unsure")).await.unwrap();
        gq.vote(&petition.id, Seal::new(NodeId::from("a"), true, 0.9)).await.unwrap();
        gq.vote(&petition.id, Seal::new(NodeId::from("b"), false, 0.1)).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(result.approved);
        assert!((result.approval_rate - 0.9).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_override_decides_alone() {
        let options = GateQuorumOptions { source_override: true, ..Default::default() };
        let gq = quorum(&[("source", Some("shinkami")), ("a", None), ("b", None)], options).await;
        let petition = gq.propose(json!("veto")).await.unwrap();
        gq.vote(&petition.id, seal("source", false)).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert!(matches!(
            gq.vote(&petition.id, seal("a", true)).await,
            Err(CouncilError::PetitionClosed { status: PetitionStatus::Rejected, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_element_affinity_boosts_matching_members() {
        let options = GateQuorumOptions { element_affinity: Some(Element::Fire), ..Default::default() };
        let gq = quorum(&[("fire", Some("draconia")), ("earth", Some("lyssandria"))], options).await;
        let draconia = Guardian::Draconia.weight() * 1.25;
        assert!((gq.weight_of(&NodeId::from("fire")).await - draconia).abs() < 1e-9);
        assert_eq!(gq.weight_of(&NodeId::from("earth")).await, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsealed_petition_expires() {
        let gq = quorum(&[("a", None), ("b", None)], GateQuorumOptions::default()).await;
        gq.initialize(Some(&CouncilConfig { timeout_ms: Some(1_000), ..Default::default() })).await.unwrap();
        let petition = gq.propose(json!("late")).await.unwrap();
        gq.vote(&petition.id, seal("a", true)).await.unwrap();

        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(!result.approved);
        assert_eq!(result.participation_rate, 0.5);
        assert_eq!(gq.petition(&petition.id).await.unwrap().status, PetitionStatus::Expired);
        gq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejoined_member_starts_clean() {
        let gq = quorum(&[("x", None), ("y", None)], GateQuorumOptions::default()).await;
        let first = gq.propose(json!(1)).await.unwrap();
        gq.vote(&first.id, seal("x", false)).await.unwrap();

        gq.remove_node(&NodeId::from("x")).await.unwrap();
        assert!(matches!(
            gq.vote(&first.id, seal("x", true)).await,
            Err(CouncilError::UnknownNode(_))
        ));
        gq.add_node(NodeId::from("x"), &AddNodeOptions::default()).await.unwrap();

        let second = gq.propose(json!(2)).await.unwrap();
        assert!(gq.petition(&second.id).await.unwrap().seals.is_empty());
        gq.vote(&second.id, seal("x", true)).await.unwrap();
        gq.vote(&second.id, seal("y", true)).await.unwrap();
        assert!(gq.await_consensus(&second.id).await.unwrap().approved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_removal_completes_the_council() {
        let gq = quorum(&[("n0", None), ("n1", None), ("n2", None)], GateQuorumOptions::default()).await;
        gq.initialize(None).await.unwrap();
        let petition = gq.propose(json!("quorum by departure")).await.unwrap();
        gq.vote(&petition.id, seal("n0", true)).await.unwrap();
        gq.vote(&petition.id, seal("n1", true)).await.unwrap();
        assert_eq!(gq.petition(&petition.id).await.unwrap().status, PetitionStatus::Pending);

        gq.remove_node(&NodeId::from("n2")).await.unwrap();
        assert_eq!(gq.petition(&petition.id).await.unwrap().status, PetitionStatus::Committed);

        let started = Instant::now();
        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.approval_rate, 1.0);
        assert_eq!(result.participation_rate, 1.0);
        assert!(started.elapsed() < Duration::from_secs(1));
        gq.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_member_seal_is_withdrawn() {
        let gq = quorum(&[("a", None), ("b", None), ("c", None)], GateQuorumOptions::default()).await;
        let petition = gq.propose(json!("open")).await.unwrap();
        gq.vote(&petition.id, seal("a", false)).await.unwrap();

        gq.remove_node(&NodeId::from("a")).await.unwrap();
        gq.add_node(NodeId::from("a"), &AddNodeOptions::default()).await.unwrap();
        assert!(gq.petition(&petition.id).await.unwrap().seals.is_empty());

        for voter in ["a", "b", "c"] {
            gq.vote(&petition.id, seal(voter, true)).await.unwrap();
        }
        let result = gq.await_consensus(&petition.id).await.unwrap();
        assert!(result.approved);
        assert_eq!(result.approval_rate, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors() {
        let gq = quorum(&[("a", None)], GateQuorumOptions::default()).await;
        assert!(matches!(
            gq.await_consensus("nonexistent-id").await,
            Err(CouncilError::UnknownPetition(_))
        ));
        let petition = gq.propose(json!(0)).await.unwrap();
        assert!(matches!(
            gq.vote(&petition.id, Seal::new(NodeId::from("a"), true, 2.0)).await,
            Err(CouncilError::InvalidSeal(_))
        ));

        gq.shutdown().await;
        assert!(matches!(gq.propose(json!(1)).await, Err(CouncilError::EngineShutdown)));
        assert!(matches!(gq.await_consensus(&petition.id).await, Err(CouncilError::EngineShutdown)));
    }
}
