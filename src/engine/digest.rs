//! Gossip digests: compact per-endpoint state summaries.
//!
//! A digest carries just enough for a peer to decide who is ahead:
//! `(node, generation, max_version)`. The SYN phase ships digest lists
//! instead of full states; full states travel only for endpoints that
//! turned out to differ.

use crate::core::{Generation, NodeId, Version};
use crate::engine::endpoint::EndpointState;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Digest {
    pub node_id: NodeId,
    pub generation: Generation,
    pub max_version: Version,
}

impl Digest {
    pub fn of(node_id: &NodeId, state: &EndpointState) -> Self {
        Self {
            node_id: node_id.clone(),
            generation: state.generation(),
            max_version: state.max_version(),
        }
    }

    /// Digest requesting everything known about a node we have no
    /// entry for.
    pub fn request_all(node_id: NodeId) -> Self {
        Self {
            node_id,
            generation: Generation::new(0),
            max_version: Version::ZERO,
        }
    }
}
