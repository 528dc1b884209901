pub mod adapter;
pub mod engine;
pub mod evaluator;
pub mod events;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod selector;
pub mod timers;
pub mod transport;

pub use engine::{CouncilEngine, CouncilEngineOptions, ProtocolStatus};
pub use events::CouncilEvent;
pub use protocol::{
    ByzantineOptions, ByzantineQuorum, GateQuorum, GateQuorumOptions, GossipOptions, GossipPropagation,
    LeaderOptions, LeaderReplication, LegacyConsensus, Role,
};
pub use registry::{AddNodeOptions, RegistryEvent};
pub use selector::{select_for_element, select_protocol, CouncilProtocol};
pub use transport::{CouncilMessage, CouncilReply, LoopbackTransport, Transport, TransportError};
