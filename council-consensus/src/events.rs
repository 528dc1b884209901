use serde::Serialize;
use tokio::sync::broadcast;

use council_common::NodeId;

const EVENT_CAPACITY: usize = 256;

/// Everything an engine reports to observers.
///
/// Protocol engines emit these on their own bus; the council façade
/// re-emits them unchanged and adds its own `Council*` lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CouncilEvent {
    Initialized { node_id: NodeId, protocol: String },
    Shutdown { node_id: NodeId, protocol: String },
    Proposed { id: String, protocol: String },
    SealRecorded { id: String, voter: NodeId, approve: bool },
    LeaderElected { leader: NodeId, term: u64 },
    EntryReplicated { id: String, term: u64, acks: usize },
    ViewChanged { view: u64, primary: NodeId },
    EquivocationDetected { offender: NodeId, view: u64, sequence: u64 },
    GossipRoundComplete { id: String, round: u32, participation_rate: f64 },
    QuorumReached { id: String, approved: bool },
    Expired { id: String },
    CouncilInitialized { protocol: String, degraded: bool },
    CouncilShutdown { protocol: String },
}

/// Fan-out channel for `CouncilEvent`s. Emitting with no subscriber is fine.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CouncilEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn emit(&self, event: CouncilEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CouncilEvent> {
        self.tx.subscribe()
    }
}
