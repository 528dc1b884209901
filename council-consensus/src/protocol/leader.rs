//! leader.rs
//!
//! Raft-style leader replication, served under the `council-vote` and
//! `ancient-accord` names.
//!
//! The leader appends each proposal to its log and replicates it with
//! `AppendEntries`. A proposal commits once its entry is held by a majority
//! and a strict majority of members approved it. The commit point advances
//! on heartbeats and whenever a waiter polls, so seals arriving after that
//! see `PetitionClosed`.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Weak},
};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
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
    evaluator::{is_strict_majority, Tally},
    events::{CouncilEvent, EventBus},
    pool::Tracked,
    registry::{AddNodeOptions, NodeRegistry, RegistryCommand, RegistryEvent},
    timers::TimerSet,
    transport::{CouncilMessage, CouncilReply, LogEntry, Transport},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

#[derive(Debug, Clone)]
pub struct LeaderOptions {
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub heartbeat_interval: Duration,
    pub proposal_timeout: Duration,
}

impl Default for LeaderOptions {
    fn default() -> Self {
        Self {
            election_timeout_min: Duration::from_millis(150),
            election_timeout_max: Duration::from_millis(300),
            heartbeat_interval: Duration::from_millis(50),
            proposal_timeout: Duration::from_millis(council_common::config::DEFAULT_CONSENSUS_TIMEOUT_MS),
        }
    }
}

impl LeaderOptions {
    fn apply(&mut self, config: &CouncilConfig) {
        if let Some(ms) = config.heartbeat_interval_ms {
            self.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = config.timeout_ms {
            self.proposal_timeout = Duration::from_millis(ms);
        }
    }
}

struct State {
    role: Role,
    term: u64,
    voted_for: Option<NodeId>,
    leader_id: Option<NodeId>,
    log: Vec<LogEntry>,
    commit_index: u64,
    last_contact: Instant,
    members: NodeRegistry,
    pool: ProposalPool,
    /// Proposal id -> members holding its log entry.
    acks: HashMap<String, HashSet<NodeId>>,
    options: LeaderOptions,
    initialized: bool,
}

impl State {
    fn last_log(&self) -> (u64, u64) {
        self.log.last().map(|e| (e.index, e.term)).unwrap_or((0, 0))
    }

    fn step_down(&mut self, term: u64) {
        if term > self.term {
            self.term = term;
            self.voted_for = None;
        }
        self.role = Role::Follower;
    }

    fn member_acks(&self, id: &str) -> usize {
        self.acks
            .get(id)
            .map(|set| set.iter().filter(|m| self.members.contains(m)).count())
            .unwrap_or(0)
    }
}

struct Shared {
    node_id: NodeId,
    protocol: &'static str,
    state: Mutex<State>,
    progress: Progress,
    events: EventBus,
    timers: TimerSet,
    transport: Arc<dyn Transport>,
}

/// Leader-replication engine. Cloning shares the same engine.
#[derive(Clone)]
pub struct LeaderReplication {
    shared: Arc<Shared>,
}

impl LeaderReplication {
    pub fn new(
        node_id: NodeId,
        protocol: &'static str,
        options: LeaderOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let mut members = NodeRegistry::new();
        members.handle_command(RegistryCommand::Register(node_id.clone(), AddNodeOptions::default()));

        let state = State {
            role: Role::Follower,
            term: 0,
            voted_for: None,
            leader_id: None,
            log: Vec::new(),
            commit_index: 0,
            last_contact: Instant::now(),
            members,
            pool: ProposalPool::new(),
            acks: HashMap::new(),
            options,
            initialized: false,
        };

        Self {
            shared: Arc::new(Shared {
                node_id,
                protocol,
                state: Mutex::new(state),
                progress: Progress::new(),
                events: EventBus::new(),
                timers: TimerSet::new(),
                transport,
            }),
        }
    }

    pub async fn role(&self) -> Role {
        self.shared.state.lock().await.role
    }

    pub async fn term(&self) -> u64 {
        self.shared.state.lock().await.term
    }

    pub async fn leader_id(&self) -> Option<NodeId> {
        self.shared.state.lock().await.leader_id.clone()
    }

    pub async fn is_leader(&self) -> bool {
        self.role().await == Role::Leader
    }

    pub async fn commit_index(&self) -> u64 {
        self.shared.state.lock().await.commit_index
    }

    /// Starts an election now, regardless of the election timer.
    pub async fn start_election(&self) {
        self.shared.run_election().await;
    }

    /// Inbound `RequestVote`. Grants at most one vote per term, and only to a
    /// candidate whose log is at least as up to date as ours.
    pub async fn handle_request_vote(
        &self,
        candidate: &NodeId,
        term: u64,
        last_log_index: u64,
        last_log_term: u64,
    ) -> bool {
        let granted = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            if term < state.term {
                return false;
            }
            if term > state.term {
                state.step_down(term);
                state.leader_id = None;
            }
            let (our_index, our_term) = state.last_log();
            let up_to_date = (last_log_term, last_log_index) >= (our_term, our_index);
            let free = state.voted_for.as_ref().map_or(true, |v| v == candidate);
            let granted = up_to_date && free;
            if granted {
                state.voted_for = Some(candidate.clone());
                state.last_contact = Instant::now();
            }
            granted
        };
        debug!("vote request from {} for term {}: granted={}", candidate, term, granted);
        self.shared.progress.bump();
        granted
    }

    /// Inbound `AppendEntries` (an empty `entries` is a heartbeat).
    pub async fn handle_append_entries(
        &self,
        leader: &NodeId,
        term: u64,
        entries: Vec<LogEntry>,
        leader_commit: u64,
    ) -> bool {
        {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            if term < state.term {
                debug!("refusing append from {} at stale term {} < {}", leader, term, state.term);
                return false;
            }
            if term > state.term {
                state.term = term;
                state.voted_for = None;
            }
            state.role = Role::Follower;
            state.leader_id = Some(leader.clone());
            state.last_contact = Instant::now();

            for entry in entries {
                if entry.index > state.last_log().0 {
                    state.log.push(entry);
                }
            }
            let (last_index, _) = state.last_log();
            if leader_commit > state.commit_index {
                state.commit_index = leader_commit.min(last_index);
            }
        }
        self.shared.progress.bump();
        true
    }

    async fn spawn_timers(&self, options: &LeaderOptions) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let jitter = options.election_timeout_max.saturating_sub(options.election_timeout_min);
        self.shared
            .timers
            .every(options.election_timeout_min, Some(jitter), move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.election_tick().await;
                    }
                }
            })
            .await;

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        self.shared
            .timers
            .every(options.heartbeat_interval, None, move || {
                let weak = weak.clone();
                async move {
                    if let Some(shared) = weak.upgrade() {
                        shared.heartbeat().await;
                    }
                }
            })
            .await;
    }
}

impl Shared {
    async fn election_tick(&self) {
        let due = {
            let state = self.state.lock().await;
            state.role != Role::Leader && state.last_contact.elapsed() >= state.options.election_timeout_min
        };
        if due {
            self.run_election().await;
        }
    }

    async fn heartbeat(&self) {
        self.sweep_expired().await;
        let leading = self.state.lock().await.role == Role::Leader;
        if leading {
            self.replicate().await;
        }
    }

    async fn run_election(&self) {
        let (term, last_log_index, last_log_term, peers) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.role == Role::Leader {
                return;
            }
            state.role = Role::Candidate;
            state.term += 1;
            state.voted_for = Some(self.node_id.clone());
            state.leader_id = None;
            state.last_contact = Instant::now();
            let (index, log_term) = state.last_log();
            (state.term, index, log_term, state.members.peers_of(&self.node_id))
        };
        info!(target: "consensus", "EVENT:ELECTION node={} term={}", self.node_id, term);

        let mut votes = 1;
        for peer in peers {
            let request = CouncilMessage::RequestVote {
                term,
                candidate: self.node_id.clone(),
                last_log_index,
                last_log_term,
            };
            match self.transport.request(&self.node_id, &peer, request).await {
                Ok(CouncilReply::Vote { term: peer_term, granted }) => {
                    if peer_term > term {
                        self.state.lock().await.step_down(peer_term);
                        self.progress.bump();
                        debug!("{} saw higher term {} during election", self.node_id, peer_term);
                        return;
                    }
                    if granted {
                        votes += 1;
                    }
                }
                Ok(other) => debug!("unexpected reply to RequestVote from {}: {:?}", peer, other),
                Err(e) => debug!("RequestVote to {} failed: {}", peer, e),
            }
        }

        let won = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            if state.term != term || state.role != Role::Candidate {
                return;
            }
            if !is_strict_majority(votes, state.members.len()) {
                debug!("election for term {} lost with {}/{} votes", term, votes, state.members.len());
                return;
            }
            state.role = Role::Leader;
            state.leader_id = Some(self.node_id.clone());
            // In-flight entries are replicated again under the new term.
            for id in state.pool.unsettled_ids() {
                state.acks.insert(id, HashSet::from([self.node_id.clone()]));
            }
            votes
        };

        info!(target: "consensus", "EVENT:LEADER node={} term={} votes={}", self.node_id, term, won);
        self.events.emit(CouncilEvent::LeaderElected { leader: self.node_id.clone(), term });
        self.progress.bump();
        self.replicate().await;
    }

    /// Sends every peer the unsettled entries it has not acknowledged yet,
    /// then re-evaluates the unsettled proposals.
    async fn replicate(&self) {
        let (term, leader_commit, batches) = {
            let state = self.state.lock().await;
            if state.role != Role::Leader {
                return;
            }
            let unsettled: HashSet<String> = state.pool.unsettled_ids().into_iter().collect();
            let batches: Vec<(NodeId, Vec<LogEntry>)> = state
                .members
                .peers_of(&self.node_id)
                .into_iter()
                .map(|peer| {
                    let entries = state
                        .log
                        .iter()
                        .filter(|e| unsettled.contains(&e.proposal_id))
                        .filter(|e| !state.acks.get(&e.proposal_id).map_or(false, |a| a.contains(&peer)))
                        .cloned()
                        .collect();
                    (peer, entries)
                })
                .collect();
            (state.term, state.commit_index, batches)
        };

        for (peer, entries) in batches {
            let ids: Vec<String> = entries.iter().map(|e| e.proposal_id.clone()).collect();
            let request = CouncilMessage::AppendEntries {
                term,
                leader: self.node_id.clone(),
                entries,
                leader_commit,
            };
            match self.transport.request(&self.node_id, &peer, request).await {
                Ok(CouncilReply::Append { term: peer_term, success }) => {
                    let mut guard = self.state.lock().await;
                    let state = &mut *guard;
                    if peer_term > state.term {
                        warn!("{} stepping down: {} is at term {}", self.node_id, peer, peer_term);
                        state.step_down(peer_term);
                        state.leader_id = None;
                        drop(guard);
                        self.progress.bump();
                        return;
                    }
                    if success && state.term == term {
                        for id in ids {
                            self.record_ack(state, &id, &peer);
                        }
                    }
                }
                Ok(other) => debug!("unexpected reply to AppendEntries from {}: {:?}", peer, other),
                Err(e) => debug!("AppendEntries to {} failed: {}", peer, e),
            }
        }

        let mut guard = self.state.lock().await;
        self.decide_unsettled(&mut guard);
        drop(guard);
        self.progress.bump();
    }

    fn record_ack(&self, state: &mut State, id: &str, peer: &NodeId) {
        let n = state.members.len();
        let before = state.member_acks(id);
        state.acks.entry(id.to_string()).or_default().insert(peer.clone());
        let after = state.member_acks(id);
        if !is_strict_majority(before, n) && is_strict_majority(after, n) {
            info!(target: "consensus", "EVENT:REPLICATED id={} term={} acks={}", id, state.term, after);
            self.events.emit(CouncilEvent::EntryReplicated {
                id: id.to_string(),
                term: state.term,
                acks: after,
            });
        }
    }

    /// Commits or rejects `id` if its outcome is settled. Leader only.
    fn decide(&self, state: &mut State, id: &str) -> Option<ProposalResult> {
        if state.role != Role::Leader {
            return None;
        }
        let n = state.members.len();
        let acks = state.member_acks(id);
        let tracked = state.pool.find_by_id_mut(id)?;
        if let Some(result) = &tracked.result {
            return Some(result.clone());
        }

        let tally = Tally::count(&tracked.item.votes, &state.members);
        let status = if is_strict_majority(acks, n) && is_strict_majority(tally.approvals, n) {
            ProposalStatus::Accepted
        } else if !is_strict_majority(tally.approvals + tally.outstanding(), n) {
            ProposalStatus::Rejected
        } else {
            return None;
        };

        let result = close_proposal(tracked, &state.members, status);
        if status == ProposalStatus::Accepted {
            if let Some(entry) = state.log.iter().find(|e| e.proposal_id == id) {
                state.commit_index = state.commit_index.max(entry.index);
            }
        }
        info!(target: "consensus", "EVENT:COMMIT id={} approved={} term={}", id, result.approved, state.term);
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

    async fn sweep_expired(&self) {
        let now = Instant::now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
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
impl LegacyConsensus for LeaderReplication {
    fn protocol(&self) -> &'static str {
        self.shared.protocol
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
            state.options.clone()
        };

        info!("{} initialized as {} (heartbeat {:?})", self.shared.node_id, self.shared.protocol, options.heartbeat_interval);
        self.shared.events.emit(CouncilEvent::Initialized {
            node_id: self.shared.node_id.clone(),
            protocol: self.shared.protocol.to_string(),
        });

        self.shared.run_election().await;
        self.spawn_timers(&options).await;
        Ok(())
    }

    async fn shutdown(&self) {
        self.shared.progress.close();
        let stopped = self.shared.timers.cancel_all().await;
        {
            let mut state = self.shared.state.lock().await;
            state.role = Role::Follower;
            state.leader_id = None;
        }
        info!("{} shut down ({} timers stopped)", self.shared.node_id, stopped);
        self.shared.events.emit(CouncilEvent::Shutdown {
            node_id: self.shared.node_id.clone(),
            protocol: self.shared.protocol.to_string(),
        });
    }

    async fn add_node(&self, id: NodeId, opts: &AddNodeOptions) -> Result<RegistryEvent> {
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

    async fn remove_node(&self, id: &NodeId) -> Result<RegistryEvent> {
        self.shared.progress.ensure_open()?;
        let event = {
            let mut guard = self.shared.state.lock().await;
            let state = &mut *guard;
            let event = state.members.handle_command(RegistryCommand::Drop(id.clone()));
            if matches!(event, RegistryEvent::Dropped(_)) {
                withdraw_votes(&mut state.pool, id);
                for holders in state.acks.values_mut() {
                    holders.remove(id);
                }
            }
            self.shared.decide_unsettled(state);
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
            if state.role != Role::Leader {
                return Err(CouncilError::NotLeader { leader: state.leader_id.clone() });
            }
            let id = new_id("raft");
            let proposal = Proposal::new(id.clone(), self.shared.node_id.clone(), value.clone(), state.term);
            let index = state.last_log().0 + 1;
            state.log.push(LogEntry { index, term: state.term, proposal_id: id.clone(), value });
            state.acks.insert(id.clone(), HashSet::from([self.shared.node_id.clone()]));
            state.pool.add(id, Tracked::new(proposal.clone(), state.options.proposal_timeout));
            proposal
        };

        info!(target: "consensus", "EVENT:PROPOSE id={} proposer={} term={}", proposal.id, proposal.proposer_id, proposal.term);
        self.shared.events.emit(CouncilEvent::Proposed {
            id: proposal.id.clone(),
            protocol: self.shared.protocol.to_string(),
        });
        self.shared.progress.bump();
        self.shared.replicate().await;
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
        let mut state = self.shared.state.lock().await;
        state.acks.remove(id);
        state.pool.remove(id).is_some()
    }

    async fn proposals(&self) -> Vec<Proposal> {
        self.shared.state.lock().await.pool.items().cloned().collect()
    }

    async fn results(&self) -> Vec<ProposalResult> {
        self.shared.state.lock().await.pool.results().cloned().collect()
    }
}
