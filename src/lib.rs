#![forbid(unsafe_code)]

//! Cluster membership and state dissemination for a distributed
//! database node: every member can answer, for every other member,
//! does it exist, is it alive, and how do I reach it - with no central
//! coordinator. Members periodically exchange compact digests of what
//! they know and transfer only the deltas (SYN -> ACK -> ACK2).

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod transport;
pub mod wire;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

pub use crate::config::{ConfigError, GossipConfig};
pub use crate::core::{ClusterId, Generation, NodeId, PeerAddr, Version, WallClock};
pub use crate::engine::{
    AppState, AppStateKey, Digest, EndpointState, EngineError, Gossiper, HeartbeatSnapshot,
    MergeOutcome, PeerRegistry, ProtocolError, StateStore,
};
pub use crate::transport::{
    Dialer, GossipHandler, PeerChannel, TcpDialer, TcpGossipServer, TcpServerHandle,
    TransportError,
};
pub use crate::wire::{
    DigestAck, DigestAck2, DigestSyn, EndpointStateWire, GossipEnvelope, GossipMessage,
    HeartbeatPing, HeartbeatPong, WireLimits,
};
