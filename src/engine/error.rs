//! Engine-facing error kinds.
//!
//! Transport and protocol failures never surface through the engine's
//! read APIs; they end up in logs, metrics, and eventually in liveness.
//! `ProtocolError` exists for the handler boundary and for tests.
//! `EngineError` names the fatal category: an internal invariant no
//! longer holds, state integrity cannot be guaranteed, and the engine
//! aborts rather than gossiping corrupt state.

use thiserror::Error;

use crate::core::{ClusterId, NodeId};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProtocolError {
    /// The sender belongs to a different cluster; its message is
    /// discarded and it is dropped from the peer registry.
    #[error("cluster mismatch: expected {expected}, got {got}")]
    ClusterMismatch { expected: ClusterId, got: String },

    /// The engine has been stopped; no further merges are accepted.
    #[error("gossip engine is stopped")]
    Stopped,
}

/// Fatal internal invariant violations. Never returned - raised as a
/// panic at the point the invariant is found broken.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    /// The local node's entry vanished from the endpoint map. Every
    /// tick and digest depends on it existing.
    #[error("local endpoint entry for {node_id} missing from the state store")]
    LocalEntryMissing { node_id: NodeId },
}
