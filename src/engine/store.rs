//! The endpoint state store: one locked map, all mutation funnels here.
//!
//! Lock discipline: the map is behind a readers-writer lock; the local
//! heartbeat has its own finer lock inside `HeartbeatState`. The two
//! are never held at once - tick and app-state paths draw a version
//! first, release the heartbeat lock, then take the map lock. No I/O
//! happens under either lock; callers get isolated copies.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::core::{ClusterId, Generation, NodeId, PeerAddr, WallClock};
use crate::engine::digest::Digest;
use crate::engine::endpoint::{AppState, AppStateKey, EndpointState};
use crate::engine::error::EngineError;
use crate::engine::heartbeat::{HeartbeatSnapshot, HeartbeatState};
use crate::engine::merge::{self, DigestExamination, MergeOutcome};

pub struct StateStore {
    cluster_id: ClusterId,
    local: HeartbeatState,
    endpoints: RwLock<BTreeMap<NodeId, EndpointState>>,
}

impl StateStore {
    /// Create the store with the local endpoint seeded: heartbeat at
    /// version 0, `STATUS = "UP"`, `ADDR = listen_address`.
    pub fn new(
        node_id: NodeId,
        cluster_id: ClusterId,
        generation: Generation,
        listen_address: &PeerAddr,
        now: WallClock,
    ) -> Self {
        let local = HeartbeatState::new(node_id.clone(), generation);
        let mut entry = EndpointState::new(local.snapshot(), now);
        entry.app_states.insert(
            AppStateKey::status(),
            AppState {
                value: "UP".to_string(),
                version: local.next_version(),
            },
        );
        entry.app_states.insert(
            AppStateKey::addr(),
            AppState {
                value: listen_address.as_str().to_string(),
                version: local.next_version(),
            },
        );

        let mut endpoints = BTreeMap::new();
        endpoints.insert(node_id, entry);

        Self {
            cluster_id,
            local,
            endpoints: RwLock::new(endpoints),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        self.local.node_id()
    }

    pub fn cluster_id(&self) -> &ClusterId {
        &self.cluster_id
    }

    pub fn generation(&self) -> Generation {
        self.local.generation()
    }

    /// Bump the local heartbeat and sync it into the endpoint map.
    /// Never fails; a missing local entry is an [`EngineError`] and
    /// aborts, because state integrity is gone.
    pub fn tick_local(&self, now: WallClock) -> HeartbeatSnapshot {
        let snapshot = self.local.bump();

        let mut endpoints = self.write_lock();
        let entry = self.local_entry_mut(&mut endpoints);
        entry.heartbeat = snapshot.clone();
        entry.is_alive = true;
        entry.update_timestamp = now;
        snapshot
    }

    /// Set (or update) a local application state. The entry's version
    /// is drawn from the shared per-endpoint counter, so digests stay
    /// totally ordered with heartbeat ticks.
    pub fn set_app_state(&self, key: AppStateKey, value: impl Into<String>, now: WallClock) {
        let version = self.local.next_version();

        let mut endpoints = self.write_lock();
        let entry = self.local_entry_mut(&mut endpoints);
        entry.app_states.insert(
            key,
            AppState {
                value: value.into(),
                version,
            },
        );
        entry.is_alive = true;
        entry.update_timestamp = now;
    }

    /// Apply one incoming endpoint state under the write lock.
    ///
    /// The local node's entry is authoritative here and is never
    /// replaced by gossip, whatever the incoming claims.
    pub fn apply_merge(
        &self,
        node_id: &NodeId,
        incoming: &EndpointState,
        now: WallClock,
    ) -> MergeOutcome {
        if node_id == self.local.node_id() {
            tracing::debug!("ignoring gossiped state for the local node {node_id}");
            return MergeOutcome::Rejected;
        }

        let mut endpoints = self.write_lock();
        match endpoints.get_mut(node_id) {
            Some(local) => merge::merge_endpoint(local, incoming, now),
            None => {
                let mut entry = incoming.clone();
                entry.is_alive = true;
                entry.update_timestamp = now;
                endpoints.insert(node_id.clone(), entry);
                MergeOutcome::Accepted
            }
        }
    }

    /// One digest per known endpoint, local included. Order is
    /// unspecified; consumers must not depend on it.
    pub fn snapshot_digests(&self) -> Vec<Digest> {
        let endpoints = self.read_lock();
        endpoints
            .iter()
            .map(|(node_id, state)| Digest::of(node_id, state))
            .collect()
    }

    /// Deep copy of one endpoint's state.
    pub fn snapshot_endpoint(&self, node_id: &NodeId) -> Option<EndpointState> {
        self.read_lock().get(node_id).cloned()
    }

    /// Full snapshot for diagnostics; unordered.
    pub fn get_state(&self) -> Vec<(NodeId, EndpointState)> {
        self.read_lock()
            .iter()
            .map(|(node_id, state)| (node_id.clone(), state.clone()))
            .collect()
    }

    /// Compare an incoming digest list against current state, under the
    /// read lock (pure computation, no I/O).
    pub fn examine_digests(&self, digests: &[Digest]) -> DigestExamination {
        merge::examine_digests(&self.read_lock(), digests)
    }

    /// Full states for the nodes named by `requests`, where we have
    /// them. Used to build ACK2 replies.
    pub fn states_for(&self, requests: &[Digest]) -> Vec<(NodeId, EndpointState)> {
        let endpoints = self.read_lock();
        requests
            .iter()
            .filter_map(|digest| {
                endpoints
                    .get(&digest.node_id)
                    .map(|state| (digest.node_id.clone(), state.clone()))
            })
            .collect()
    }

    /// Flip `is_alive` off for non-local endpoints whose last update is
    /// older than `threshold`. Returns the nodes that flipped.
    pub fn sweep_stale(&self, now: WallClock, threshold: Duration) -> Vec<NodeId> {
        let mut flipped = Vec::new();
        let mut endpoints = self.write_lock();
        for (node_id, state) in endpoints.iter_mut() {
            if node_id == self.local.node_id() {
                continue;
            }
            if state.is_alive && now.saturating_since(state.update_timestamp) > threshold.as_secs()
            {
                state.is_alive = false;
                flipped.push(node_id.clone());
            }
        }
        flipped
    }

    fn local_entry_mut<'a>(
        &self,
        endpoints: &'a mut BTreeMap<NodeId, EndpointState>,
    ) -> &'a mut EndpointState {
        let node_id = self.local.node_id();
        endpoints.get_mut(node_id).unwrap_or_else(|| {
            panic!(
                "{}",
                EngineError::LocalEntryMissing {
                    node_id: node_id.clone(),
                }
            )
        })
    }

    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<NodeId, EndpointState>> {
        self.endpoints.read().expect("state store lock poisoned")
    }

    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<NodeId, EndpointState>> {
        self.endpoints.write().expect("state store lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Version;

    fn store() -> StateStore {
        StateStore::new(
            NodeId::new("local").unwrap(),
            ClusterId::new("test").unwrap(),
            Generation::new(1000),
            &PeerAddr::new("127.0.0.1:7000").unwrap(),
            WallClock::from_secs(1),
        )
    }

    fn remote(name: &str, generation: u64, hb_version: u64) -> EndpointState {
        EndpointState::new(
            HeartbeatSnapshot {
                node_id: NodeId::new(name).unwrap(),
                generation: Generation::new(generation),
                version: Version::new(hb_version),
            },
            WallClock::from_secs(5),
        )
    }

    #[test]
    fn local_entry_is_seeded_with_status_and_addr() {
        let store = store();
        let local = store.snapshot_endpoint(store.node_id()).unwrap();
        assert_eq!(
            local.app_state(&AppStateKey::status()).unwrap().value,
            "UP"
        );
        assert_eq!(
            local.app_state(&AppStateKey::addr()).unwrap().value,
            "127.0.0.1:7000"
        );
        assert!(local.is_alive);
        // Seeding drew two versions from the shared counter.
        assert_eq!(local.max_version(), Version::new(2));
    }

    #[test]
    fn tick_advances_heartbeat_and_timestamp() {
        let store = store();
        let before = store.snapshot_endpoint(store.node_id()).unwrap();

        let snapshot = store.tick_local(WallClock::from_secs(42));
        assert!(snapshot.version > before.heartbeat.version);

        let after = store.snapshot_endpoint(store.node_id()).unwrap();
        assert_eq!(after.heartbeat.version, snapshot.version);
        assert_eq!(after.update_timestamp, WallClock::from_secs(42));
    }

    #[test]
    fn ticks_and_app_mutations_never_decrease_digest() {
        let store = store();
        let mut last = Version::ZERO;
        for i in 0..5 {
            store.tick_local(WallClock::from_secs(i));
            store.set_app_state(AppStateKey::new("LOAD"), format!("{i}"), WallClock::from_secs(i));
            let digest = store
                .snapshot_digests()
                .into_iter()
                .find(|d| &d.node_id == store.node_id())
                .unwrap();
            assert!(digest.max_version > last);
            last = digest.max_version;
        }
    }

    #[test]
    fn merge_inserts_unknown_endpoints() {
        let store = store();
        let node = NodeId::new("remote-1").unwrap();
        let outcome = store.apply_merge(&node, &remote("remote-1", 500, 10), WallClock::from_secs(7));
        assert_eq!(outcome, MergeOutcome::Accepted);

        let entry = store.snapshot_endpoint(&node).unwrap();
        assert!(entry.is_alive);
        assert_eq!(entry.update_timestamp, WallClock::from_secs(7));
        assert_eq!(entry.generation(), Generation::new(500));
    }

    #[test]
    fn local_entry_ignores_incoming_merges() {
        let store = store();
        let before = store.snapshot_endpoint(store.node_id()).unwrap();

        let forged = remote("local", 9999, 9999);
        let outcome = store.apply_merge(&store.node_id().clone(), &forged, WallClock::from_secs(8));
        assert_eq!(outcome, MergeOutcome::Rejected);
        assert_eq!(store.snapshot_endpoint(store.node_id()).unwrap(), before);
    }

    #[test]
    fn digests_cover_every_endpoint() {
        let store = store();
        let node = NodeId::new("remote-1").unwrap();
        store.apply_merge(&node, &remote("remote-1", 500, 10), WallClock::from_secs(7));

        let digests = store.snapshot_digests();
        assert_eq!(digests.len(), 2);
        for digest in &digests {
            let state = store.snapshot_endpoint(&digest.node_id).unwrap();
            assert_eq!(digest.max_version, state.max_version());
        }
    }

    #[test]
    fn sweep_flips_stale_endpoints_but_not_local() {
        let store = store();
        let node = NodeId::new("remote-1").unwrap();
        store.apply_merge(&node, &remote("remote-1", 500, 10), WallClock::from_secs(100));

        // 5s since last update, threshold 4s: remote flips, local does not.
        let flipped = store.sweep_stale(WallClock::from_secs(105), Duration::from_secs(4));
        assert_eq!(flipped, vec![node.clone()]);
        assert!(!store.snapshot_endpoint(&node).unwrap().is_alive);
        assert!(store.snapshot_endpoint(store.node_id()).unwrap().is_alive);

        // Second sweep reports nothing new.
        let again = store.sweep_stale(WallClock::from_secs(106), Duration::from_secs(4));
        assert!(again.is_empty());
    }

    #[test]
    fn merge_after_sweep_restores_liveness() {
        let store = store();
        let node = NodeId::new("remote-1").unwrap();
        store.apply_merge(&node, &remote("remote-1", 500, 10), WallClock::from_secs(100));
        store.sweep_stale(WallClock::from_secs(105), Duration::from_secs(4));
        assert!(!store.snapshot_endpoint(&node).unwrap().is_alive);

        let outcome =
            store.apply_merge(&node, &remote("remote-1", 500, 11), WallClock::from_secs(106));
        assert!(outcome.advanced());
        assert!(store.snapshot_endpoint(&node).unwrap().is_alive);
    }
}
