//! Peer registry: who we can gossip to, and in what state.
//!
//! Three disjoint address sets: live, unreachable, seeds. Seeds are
//! configured and never move; the other two are driven by RPC results
//! and peer discovery. The registry lock is independent of the state
//! store's - when an operation needs both, the store comes first.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use rand::seq::IteratorRandom;

use crate::core::PeerAddr;

#[derive(Debug, Default)]
struct RegistryInner {
    live: BTreeSet<PeerAddr>,
    unreachable: BTreeSet<PeerAddr>,
    seeds: BTreeSet<PeerAddr>,
    /// Consecutive failure counts for live peers.
    failures: BTreeMap<PeerAddr, u32>,
}

/// Targets for one gossip round.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct GossipTargets {
    pub live: Option<PeerAddr>,
    pub unreachable: Option<PeerAddr>,
    pub seed: Option<PeerAddr>,
}

impl GossipTargets {
    /// Distinct addresses in send order.
    pub fn addresses(&self) -> Vec<PeerAddr> {
        let mut out = Vec::new();
        for addr in [&self.live, &self.unreachable, &self.seed]
            .into_iter()
            .flatten()
        {
            if !out.contains(addr) {
                out.push(addr.clone());
            }
        }
        out
    }
}

/// Observable registry state, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrySnapshot {
    pub live: Vec<PeerAddr>,
    pub unreachable: Vec<PeerAddr>,
    pub seeds: Vec<PeerAddr>,
}

pub struct PeerRegistry {
    self_addr: PeerAddr,
    unreachable_threshold: u32,
    seed_gossip_period: u64,
    inner: Mutex<RegistryInner>,
}

impl PeerRegistry {
    pub fn new(
        self_addr: PeerAddr,
        seeds: &[PeerAddr],
        unreachable_threshold: u32,
        seed_gossip_period: u64,
    ) -> Self {
        let mut inner = RegistryInner::default();
        for seed in seeds {
            if *seed != self_addr {
                inner.seeds.insert(seed.clone());
            }
        }
        Self {
            self_addr,
            unreachable_threshold,
            seed_gossip_period,
            inner: Mutex::new(inner),
        }
    }

    /// Record a peer discovered via SYN or a successful dial.
    /// Idempotent; the self address is never registered.
    pub fn add_peer(&self, addr: &PeerAddr) {
        if *addr == self.self_addr {
            return;
        }
        let mut inner = self.lock();
        if !inner.live.contains(addr) && !inner.unreachable.contains(addr) {
            tracing::info!("discovered peer {addr}");
            inner.live.insert(addr.clone());
        }
    }

    /// A successful RPC: the peer is live and its failure streak resets.
    pub fn mark_live(&self, addr: &PeerAddr) {
        if *addr == self.self_addr {
            return;
        }
        let mut inner = self.lock();
        if inner.unreachable.remove(addr) {
            tracing::info!("peer {addr} is reachable again");
        }
        inner.failures.remove(addr);
        inner.live.insert(addr.clone());
    }

    /// A failed RPC. After `unreachable_threshold` consecutive failures
    /// the peer moves to the unreachable set; returns true on that
    /// transition.
    pub fn record_failure(&self, addr: &PeerAddr) -> bool {
        let mut inner = self.lock();
        let count = inner.failures.entry(addr.clone()).or_insert(0);
        *count += 1;
        if *count >= self.unreachable_threshold && inner.live.contains(addr) {
            inner.live.remove(addr);
            inner.failures.remove(addr);
            inner.unreachable.insert(addr.clone());
            tracing::warn!("peer {addr} marked unreachable");
            return true;
        }
        false
    }

    /// Drop a peer entirely (cluster mismatch). Seeds are configuration
    /// and stay put.
    pub fn remove_peer(&self, addr: &PeerAddr) {
        let mut inner = self.lock();
        inner.live.remove(addr);
        inner.unreachable.remove(addr);
        inner.failures.remove(addr);
    }

    /// Pick targets for round `round`: one random live peer, plus - one
    /// round in `seed_gossip_period` - one unreachable peer and one
    /// seed, when present and distinct.
    pub fn sample(&self, round: u64) -> GossipTargets {
        let inner = self.lock();
        let mut rng = rand::rng();
        let mut targets = GossipTargets {
            live: inner.live.iter().choose(&mut rng).cloned(),
            ..GossipTargets::default()
        };

        if round % self.seed_gossip_period == 0 {
            targets.unreachable = inner
                .unreachable
                .iter()
                .filter(|addr| Some(*addr) != targets.live.as_ref())
                .choose(&mut rng)
                .cloned();
            targets.seed = inner
                .seeds
                .iter()
                .filter(|addr| {
                    Some(*addr) != targets.live.as_ref()
                        && Some(*addr) != targets.unreachable.as_ref()
                })
                .choose(&mut rng)
                .cloned();
        }

        targets
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.lock();
        RegistrySnapshot {
            live: inner.live.iter().cloned().collect(),
            unreachable: inner.unreachable.iter().cloned().collect(),
            seeds: inner.seeds.iter().cloned().collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("peer registry lock poisoned")
    }
}
