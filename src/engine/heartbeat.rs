//! Local heartbeat state and its snapshot form.
//!
//! `HeartbeatState` is the one mutable heartbeat in the process: the
//! local node's. It is deliberately not `Clone` - only `HeartbeatSnapshot`
//! values cross module or thread boundaries. Remote heartbeats exist
//! only as snapshots inside endpoint entries.

use std::sync::Mutex;

use crate::core::{Generation, NodeId, Version};

/// Immutable view of a heartbeat, safe to copy and put on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatSnapshot {
    pub node_id: NodeId,
    pub generation: Generation,
    pub version: Version,
}

/// The local node's heartbeat plus the per-endpoint version counter.
///
/// Heartbeat ticks and application-state mutations draw versions from
/// the same counter, so every version issued by this node is distinct
/// and the endpoint's max version is totally ordered. The lock is
/// finer-grained than the state store's so heartbeat bumps never
/// contend with full-map snapshots; it must not be acquired while the
/// store's map lock is held.
pub struct HeartbeatState {
    node_id: NodeId,
    generation: Generation,
    counter: Mutex<u64>,
}

impl HeartbeatState {
    /// The version counter starts at 0; the first issued version is 1.
    pub fn new(node_id: NodeId, generation: Generation) -> Self {
        Self {
            node_id,
            generation,
            counter: Mutex::new(0),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Fixed for the life of the process.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Bump the heartbeat and return the resulting snapshot.
    pub fn bump(&self) -> HeartbeatSnapshot {
        let version = self.next_version();
        HeartbeatSnapshot {
            node_id: self.node_id.clone(),
            generation: self.generation,
            version,
        }
    }

    /// Issue the next version for an application-state mutation.
    pub fn next_version(&self) -> Version {
        let mut counter = self.counter.lock().expect("heartbeat lock poisoned");
        *counter += 1;
        Version::new(*counter)
    }

    /// Current heartbeat view without advancing anything.
    pub fn snapshot(&self) -> HeartbeatSnapshot {
        let counter = self.counter.lock().expect("heartbeat lock poisoned");
        HeartbeatSnapshot {
            node_id: self.node_id.clone(),
            generation: self.generation,
            version: Version::new(*counter),
        }
    }
}
