//! Engine configuration and validation.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{ClusterId, NodeId, PeerAddr};

/// Floor for the per-call RPC timeout when derived from the heartbeat
/// interval.
pub const MIN_RPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Smallest accepted frame cap. Anything below this cannot carry a
/// useful digest list.
pub const MIN_FRAME_BYTES: usize = 1024;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NonPositive { field: &'static str },
    #[error("{field} must be at least {min}, got {got}")]
    BelowMinimum {
        field: &'static str,
        min: usize,
        got: usize,
    },
}

/// Options recognised by the gossip engine.
///
/// Validation happens once, at engine construction; no configuration
/// error is ever reported at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Authoritative local node identifier.
    pub node_id: NodeId,
    /// Traffic from any other cluster id is rejected.
    pub cluster_id: ClusterId,
    /// Reported as `sender_address` in outgoing SYN and as the local
    /// `ADDR` app state.
    pub listen_address: PeerAddr,
    /// Period of the heartbeat ticker.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
    /// Period of the gossip round; defaults to `heartbeat_interval`.
    #[serde(default)]
    pub gossip_interval: Option<Duration>,
    /// Initial peer addresses. Not privileged after bootstrap, but one
    /// is gossiped to every `seed_gossip_period` rounds.
    #[serde(default)]
    pub seeds: Vec<PeerAddr>,
    /// Per-call timeout for SYN/ACK2; defaults to half the heartbeat
    /// interval with a 500 ms floor.
    #[serde(default)]
    pub rpc_timeout: Option<Duration>,
    /// Staleness threshold after which an endpoint is marked not alive;
    /// defaults to twice the heartbeat interval.
    #[serde(default)]
    pub suspect_after: Option<Duration>,
    /// Round count between forced gossips to a seed and to one
    /// unreachable peer.
    #[serde(default = "default_seed_gossip_period")]
    pub seed_gossip_period: u64,
    /// Consecutive RPC failures before a peer is marked unreachable.
    #[serde(default = "default_unreachable_threshold")]
    pub unreachable_threshold: u32,
    /// Upper bound on a single wire frame.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_seed_gossip_period() -> u64 {
    5
}

fn default_unreachable_threshold() -> u32 {
    3
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024
}

impl GossipConfig {
    pub fn new(node_id: NodeId, cluster_id: ClusterId, listen_address: PeerAddr) -> Self {
        Self {
            node_id,
            cluster_id,
            listen_address,
            heartbeat_interval: default_heartbeat_interval(),
            gossip_interval: None,
            seeds: Vec::new(),
            rpc_timeout: None,
            suspect_after: None,
            seed_gossip_period: default_seed_gossip_period(),
            unreachable_threshold: default_unreachable_threshold(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::NonPositive {
                field: "heartbeat_interval",
            });
        }
        if self.gossip_interval.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::NonPositive {
                field: "gossip_interval",
            });
        }
        if self.rpc_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::NonPositive {
                field: "rpc_timeout",
            });
        }
        if self.suspect_after.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::NonPositive {
                field: "suspect_after",
            });
        }
        if self.seed_gossip_period == 0 {
            return Err(ConfigError::NonPositive {
                field: "seed_gossip_period",
            });
        }
        if self.unreachable_threshold == 0 {
            return Err(ConfigError::NonPositive {
                field: "unreachable_threshold",
            });
        }
        if self.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(ConfigError::BelowMinimum {
                field: "max_frame_bytes",
                min: MIN_FRAME_BYTES,
                got: self.max_frame_bytes,
            });
        }
        Ok(())
    }

    /// Gossip round period: configured value or the heartbeat interval.
    pub fn effective_gossip_interval(&self) -> Duration {
        self.gossip_interval.unwrap_or(self.heartbeat_interval)
    }

    /// Per-call RPC timeout: configured value or half the heartbeat
    /// interval, floored at 500 ms.
    pub fn effective_rpc_timeout(&self) -> Duration {
        self.rpc_timeout
            .unwrap_or_else(|| (self.heartbeat_interval / 2).max(MIN_RPC_TIMEOUT))
    }

    /// Staleness threshold: configured value or twice the heartbeat
    /// interval.
    pub fn effective_suspect_after(&self) -> Duration {
        self.suspect_after.unwrap_or(self.heartbeat_interval * 2)
    }
}
