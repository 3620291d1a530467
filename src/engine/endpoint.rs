//! Per-endpoint state: application entries plus liveness metadata.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{Generation, Version, WallClock};
use crate::engine::heartbeat::HeartbeatSnapshot;

/// Application-state key. `STATUS` and `ADDR` are built in; the set is
/// open so embedding systems can disseminate their own entries.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AppStateKey(String);

impl AppStateKey {
    /// Node status, `"UP"` while the node considers itself healthy.
    pub fn status() -> Self {
        Self("STATUS".to_string())
    }

    /// The node's advertised transport address.
    pub fn addr() -> Self {
        Self("ADDR".to_string())
    }

    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AppStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AppStateKey({:?})", self.0)
    }
}

impl fmt::Display for AppStateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One versioned application-state value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppState {
    pub value: String,
    pub version: Version,
}

/// Everything a node knows about one endpoint.
///
/// The local node has an entry of this exact shape in the store, so
/// read paths treat all nodes uniformly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointState {
    pub heartbeat: HeartbeatSnapshot,
    pub app_states: BTreeMap<AppStateKey, AppState>,
    pub is_alive: bool,
    /// Wall-clock seconds when this entry last advanced, locally or by
    /// merge. Drives the liveness watcher; never merged from the wire.
    pub update_timestamp: WallClock,
}

impl EndpointState {
    pub fn new(heartbeat: HeartbeatSnapshot, now: WallClock) -> Self {
        Self {
            heartbeat,
            app_states: BTreeMap::new(),
            is_alive: true,
            update_timestamp: now,
        }
    }

    pub fn generation(&self) -> Generation {
        self.heartbeat.generation
    }

    /// Highest version across the heartbeat and every app state.
    pub fn max_version(&self) -> Version {
        self.app_states
            .values()
            .map(|entry| entry.version)
            .max()
            .map_or(self.heartbeat.version, |v| v.max(self.heartbeat.version))
    }

    pub fn app_state(&self, key: &AppStateKey) -> Option<&AppState> {
        self.app_states.get(key)
    }
}
