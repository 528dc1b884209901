//! engine.rs
//!
//! `CouncilEngine`, the single entry point callers use. It owns one protocol
//! engine, speaks petition / seal on the outside and translates through the
//! adapter when the wrapped engine still speaks proposal / vote.

use std::sync::Arc;

use serde_json::Value;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};

use council_common::{
    ConsensusResult, CouncilConfig, CouncilSnapshot, Element, NodeId, Petition, Result, Seal,
};

use crate::{
    adapter::{to_consensus_result, to_petition, to_vote},
    events::{CouncilEvent, EventBus},
    protocol::{
        ByzantineOptions, ByzantineQuorum, GateQuorum, GateQuorumOptions, GossipOptions, GossipPropagation,
        LeaderOptions, LeaderReplication, LegacyConsensus,
    },
    registry::{AddNodeOptions, RegistryEvent},
    selector::{select_for_element, CouncilProtocol},
    transport::{LoopbackTransport, Transport},
};

/// How the engine's protocol came to be chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolStatus {
    Selected,
    /// The requested name was not recognized; leader-replication runs instead.
    Degraded { requested: String },
}

impl ProtocolStatus {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ProtocolStatus::Degraded { .. })
    }
}

pub struct CouncilEngineOptions {
    pub protocol: CouncilProtocol,
    pub node_id: NodeId,
    /// Defaults to a fresh `LoopbackTransport`.
    pub transport: Option<Arc<dyn Transport>>,
    pub leader: LeaderOptions,
    pub byzantine: ByzantineOptions,
    pub gossip: GossipOptions,
    pub gate_quorum: GateQuorumOptions,
}

impl CouncilEngineOptions {
    pub fn new(protocol: CouncilProtocol, node_id: NodeId) -> Self {
        Self {
            protocol,
            node_id,
            transport: None,
            leader: LeaderOptions::default(),
            byzantine: ByzantineOptions::default(),
            gossip: GossipOptions::default(),
            gate_quorum: GateQuorumOptions::default(),
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }
}

enum Backend {
    Legacy(Box<dyn LegacyConsensus>),
    Native(GateQuorum),
}

impl Backend {
    fn build(options: CouncilEngineOptions) -> Self {
        let CouncilEngineOptions { protocol, node_id, transport, leader, byzantine, gossip, gate_quorum } = options;
        let transport = transport.unwrap_or_else(|| Arc::new(LoopbackTransport::new()));
        match protocol {
            CouncilProtocol::CouncilVote | CouncilProtocol::AncientAccord => {
                Backend::Legacy(Box::new(LeaderReplication::new(node_id, protocol.as_str(), leader, transport)))
            }
            CouncilProtocol::ShinkamisDecree => {
                Backend::Legacy(Box::new(ByzantineQuorum::new(node_id, byzantine, transport)))
            }
            CouncilProtocol::Whisper => Backend::Legacy(Box::new(GossipPropagation::new(node_id, gossip, transport))),
            CouncilProtocol::GateQuorum => Backend::Native(GateQuorum::new(node_id, gate_quorum)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        match self {
            Backend::Legacy(engine) => engine.subscribe(),
            Backend::Native(engine) => engine.subscribe(),
        }
    }
}

/// Uniform petition / seal interface over the four protocols.
///
/// Must be created inside a tokio runtime: construction spawns the task that
/// relays the wrapped engine's events onto this engine's own stream.
pub struct CouncilEngine {
    protocol: CouncilProtocol,
    status: ProtocolStatus,
    node_id: NodeId,
    backend: Backend,
    events: EventBus,
    lifecycle: mpsc::UnboundedSender<CouncilEvent>,
    relay: JoinHandle<()>,
}

impl CouncilEngine {
    pub fn new(options: CouncilEngineOptions) -> Self {
        Self::with_status(options, ProtocolStatus::Selected)
    }

    /// Builds the engine named `name`. Unknown names fall back to
    /// leader-replication with a `Degraded` status and a warning.
    pub fn from_name(name: &str, node_id: NodeId) -> Self {
        match name.parse::<CouncilProtocol>() {
            Ok(protocol) => Self::new(CouncilEngineOptions::new(protocol, node_id)),
            Err(err) => {
                warn!("{}; falling back to {}", err, CouncilProtocol::CouncilVote);
                Self::with_status(
                    CouncilEngineOptions::new(CouncilProtocol::CouncilVote, node_id),
                    ProtocolStatus::Degraded { requested: name.to_string() },
                )
            }
        }
    }

    pub fn for_element(element: Option<Element>, node_id: NodeId) -> Self {
        Self::new(CouncilEngineOptions::new(select_for_element(element), node_id))
    }

    fn with_status(options: CouncilEngineOptions, status: ProtocolStatus) -> Self {
        let protocol = options.protocol;
        let node_id = options.node_id.clone();
        let backend = Backend::build(options);
        let events = EventBus::new();

        let mut inner = backend.subscribe();
        let (lifecycle, mut own) = mpsc::unbounded_channel();
        let outer = events.clone();
        // Engine events are drained first: anything the engine emitted before
        // a council event is already buffered and goes out ahead of it.
        let relay = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    received = inner.recv() => match received {
                        Ok(event) => outer.emit(event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("event relay lagged, {} events dropped", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    Some(event) = own.recv() => outer.emit(event),
                }
            }
        });

        Self { protocol, status, node_id, backend, events, lifecycle, relay }
    }

    pub fn get_protocol(&self) -> &'static str {
        self.protocol.as_str()
    }

    pub fn protocol(&self) -> CouncilProtocol {
        self.protocol
    }

    pub fn protocol_status(&self) -> &ProtocolStatus {
        &self.status
    }

    pub fn uses_legacy_fields(&self) -> bool {
        self.protocol.uses_legacy_fields()
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.events.subscribe()
    }

    pub async fn initialize(&self, config: Option<&CouncilConfig>) -> Result<()> {
        match &self.backend {
            Backend::Legacy(engine) => engine.initialize(config).await?,
            Backend::Native(engine) => engine.initialize(config).await?,
        }
        info!("council {} ready on {} ({:?})", self.protocol, self.node_id, self.status);
        self.announce(CouncilEvent::CouncilInitialized {
            protocol: self.protocol.to_string(),
            degraded: self.status.is_degraded(),
        });
        Ok(())
    }

    pub async fn shutdown(&self) {
        match &self.backend {
            Backend::Legacy(engine) => engine.shutdown().await,
            Backend::Native(engine) => engine.shutdown().await,
        }
        self.announce(CouncilEvent::CouncilShutdown { protocol: self.protocol.to_string() });
    }

    /// Queues a council event behind whatever the wrapped engine has emitted.
    fn announce(&self, event: CouncilEvent) {
        if self.lifecycle.send(event).is_err() {
            warn!("event relay stopped; council event dropped");
        }
    }

    pub async fn add_node(&self, id: NodeId, opts: &AddNodeOptions) -> Result<RegistryEvent> {
        match &self.backend {
            Backend::Legacy(engine) => engine.add_node(id, opts).await,
            Backend::Native(engine) => engine.add_node(id, opts).await,
        }
    }

    pub async fn remove_node(&self, id: &NodeId) -> Result<RegistryEvent> {
        match &self.backend {
            Backend::Legacy(engine) => engine.remove_node(id).await,
            Backend::Native(engine) => engine.remove_node(id).await,
        }
    }

    pub async fn propose(&self, value: Value) -> Result<Petition> {
        match &self.backend {
            Backend::Legacy(engine) => Ok(to_petition(&engine.propose(value).await?)),
            Backend::Native(engine) => engine.propose(value).await,
        }
    }

    pub async fn vote(&self, petition_id: &str, seal: Seal) -> Result<()> {
        match &self.backend {
            Backend::Legacy(engine) => engine.vote(petition_id, to_vote(&seal)).await,
            Backend::Native(engine) => engine.vote(petition_id, seal).await,
        }
    }

    pub async fn await_consensus(&self, petition_id: &str) -> Result<ConsensusResult> {
        match &self.backend {
            Backend::Legacy(engine) => Ok(to_consensus_result(&engine.await_consensus(petition_id).await?)),
            Backend::Native(engine) => engine.await_consensus(petition_id).await,
        }
    }

    pub async fn petition(&self, id: &str) -> Option<Petition> {
        match &self.backend {
            Backend::Legacy(engine) => engine.proposal(id).await.map(|p| to_petition(&p)),
            Backend::Native(engine) => engine.petition(id).await,
        }
    }

    /// Forgets a petition and its result. Returns whether it existed.
    pub async fn prune(&self, id: &str) -> bool {
        match &self.backend {
            Backend::Legacy(engine) => engine.prune(id).await,
            Backend::Native(engine) => engine.prune(id).await,
        }
    }

    pub async fn snapshot(&self) -> CouncilSnapshot {
        let (petitions, results) = match &self.backend {
            Backend::Legacy(engine) => (
                engine.proposals().await.iter().map(to_petition).collect(),
                engine.results().await.iter().map(to_consensus_result).collect(),
            ),
            Backend::Native(engine) => (engine.petitions().await, engine.results().await),
        };
        CouncilSnapshot::new(self.node_id.clone(), self.get_protocol(), petitions, results)
    }
}

impl Drop for CouncilEngine {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_name_degrades_to_leader_replication() {
        let engine = CouncilEngine::from_name("quantum-vote", NodeId::from("n0"));
        assert_eq!(engine.get_protocol(), "council-vote");
        assert!(engine.uses_legacy_fields());
        assert_eq!(
            engine.protocol_status(),
            &ProtocolStatus::Degraded { requested: "quantum-vote".into() }
        );
    }

    #[tokio::test]
    async fn test_known_names_are_selected() {
        for protocol in CouncilProtocol::ALL {
            let engine = CouncilEngine::from_name(protocol.as_str(), NodeId::from("n0"));
            assert_eq!(engine.protocol(), protocol);
            assert_eq!(engine.protocol_status(), &ProtocolStatus::Selected);
            assert_eq!(engine.uses_legacy_fields(), protocol != CouncilProtocol::GateQuorum);
        }
    }

    #[tokio::test]
    async fn test_for_element_uses_selector() {
        let engine = CouncilEngine::for_element(Some(Element::Fire), NodeId::from("n0"));
        assert_eq!(engine.get_protocol(), "shinkamis-decree");
        let engine = CouncilEngine::for_element(None, NodeId::from("n0"));
        assert_eq!(engine.get_protocol(), "gate-quorum");
    }

    #[tokio::test(start_paused = true)]
    async fn test_degraded_initialize_event() {
        let engine = CouncilEngine::from_name("bogus", NodeId::from("n0"));
        let mut rx = engine.subscribe();
        engine.initialize(None).await.unwrap();
        let mut seen = Vec::new();
        loop {
            match rx.recv().await.unwrap() {
                CouncilEvent::CouncilInitialized { protocol, degraded } => {
                    assert_eq!(protocol, "council-vote");
                    assert!(degraded);
                    break;
                }
                event => seen.push(event),
            }
        }
        // Everything the wrapped engine did while starting is delivered first.
        assert!(matches!(seen.first(), Some(CouncilEvent::Initialized { .. })));
        assert!(seen.iter().any(|e| matches!(e, CouncilEvent::LeaderElected { .. })));
        engine.shutdown().await;
    }
}
