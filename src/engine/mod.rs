//! The gossip engine: state store, merge rules, peer registry, tickers
//! and the three-phase digest exchange.

pub mod digest;
pub mod endpoint;
pub mod error;
pub mod gossiper;
pub mod heartbeat;
pub mod liveness;
pub mod merge;
pub mod registry;
pub mod store;

pub use digest::Digest;
pub use endpoint::{AppState, AppStateKey, EndpointState};
pub use error::{EngineError, ProtocolError};
pub use gossiper::Gossiper;
pub use heartbeat::{HeartbeatSnapshot, HeartbeatState};
pub use merge::{DigestExamination, MergeOutcome, examine_digests, merge_endpoint};
pub use registry::{GossipTargets, PeerRegistry, RegistrySnapshot};
pub use store::StateStore;
