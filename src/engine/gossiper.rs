//! The gossip engine runtime: tickers, round driver, inbound handlers.
//!
//! Three background threads cooperate through the locked store: the
//! heartbeat ticker bumps the local version, the gossip ticker runs
//! SYN rounds, and the liveness watcher demotes quiet endpoints.
//! Inbound SYN/ACK2 arrive on transport threads via [`GossipHandler`].
//! Locks are never nested and never held across I/O: every round works
//! from snapshots. A single shutdown flag stops all of it; `stop` is
//! idempotent and joins every thread it started.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::{ConfigError, GossipConfig};
use crate::core::{ClusterId, Generation, PeerAddr, WallClock};
use crate::engine::digest::Digest;
use crate::engine::endpoint::AppStateKey;
use crate::engine::error::ProtocolError;
use crate::engine::liveness;
use crate::engine::merge::MergeOutcome;
use crate::engine::registry::PeerRegistry;
use crate::engine::store::StateStore;
use crate::metrics;
use crate::transport::{Dialer, GossipHandler, TransportError};
use crate::wire::proto::{
    DigestAck, DigestAck2, DigestSyn, EndpointStateWire, HeartbeatPing, HeartbeatPong,
};

pub struct Gossiper {
    store: Arc<StateStore>,
    registry: Arc<PeerRegistry>,
    driver: RoundDriver,
    shutdown: Arc<AtomicBool>,
    started: AtomicBool,
    heartbeat_interval: Duration,
    gossip_interval: Duration,
    suspect_after: Duration,
    joins: Mutex<Vec<JoinHandle<()>>>,
}

impl Gossiper {
    /// Validate the configuration and build the engine. The local
    /// generation is this call's wall-clock second, so a restart always
    /// presents a strictly newer incarnation.
    pub fn new(config: GossipConfig, dialer: Arc<dyn Dialer>) -> Result<Self, ConfigError> {
        config.validate()?;

        let now = WallClock::now();
        let store = Arc::new(StateStore::new(
            config.node_id.clone(),
            config.cluster_id.clone(),
            Generation::now(),
            &config.listen_address,
            now,
        ));
        let registry = Arc::new(PeerRegistry::new(
            config.listen_address.clone(),
            &config.seeds,
            config.unreachable_threshold,
            config.seed_gossip_period,
        ));

        let driver = RoundDriver {
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            dialer,
            cluster_id: config.cluster_id.clone(),
            sender_address: config.listen_address.clone(),
            rpc_timeout: config.effective_rpc_timeout(),
        };

        Ok(Self {
            store,
            registry,
            driver,
            shutdown: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            heartbeat_interval: config.heartbeat_interval,
            gossip_interval: config.effective_gossip_interval(),
            suspect_after: config.effective_suspect_after(),
            joins: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the heartbeat ticker, gossip ticker, and liveness watcher.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            tracing::debug!("gossiper already started");
            return;
        }

        let mut joins = self.joins.lock().expect("gossiper join list poisoned");

        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.heartbeat_interval;
        joins.push(thread::spawn(move || {
            run_ticker_loop(interval, shutdown, move || {
                store.tick_local(WallClock::now());
            });
        }));

        let driver = self.driver.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.gossip_interval;
        let round = Arc::new(AtomicU64::new(0));
        joins.push(thread::spawn(move || {
            run_ticker_loop(interval, shutdown, move || {
                let round = round.fetch_add(1, Ordering::Relaxed);
                driver.run_round(round);
            });
        }));

        let store = Arc::clone(&self.store);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.heartbeat_interval;
        let suspect_after = self.suspect_after;
        joins.push(thread::spawn(move || {
            liveness::run_liveness_loop(store, shutdown, interval, suspect_after);
        }));
    }

    /// Stop every ticker at its next wake and join it. Idempotent;
    /// after this, inbound handler calls return
    /// [`ProtocolError::Stopped`].
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let joins = std::mem::take(&mut *self.joins.lock().expect("gossiper join list poisoned"));
        for join in joins {
            let _ = join.join();
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Drive one gossip round by hand. The internal ticker calls this
    /// with an increasing round counter; tests call it directly.
    pub fn run_round(&self, round: u64) {
        self.driver.run_round(round);
    }

    /// Legacy liveness probe against a single peer.
    pub fn ping(&self, addr: &PeerAddr) -> Result<HeartbeatPong, TransportError> {
        let ping = HeartbeatPing {
            node_id: self.store.node_id().clone(),
            generation: self.store.generation(),
        };
        let mut channel = self.driver.dialer.dial(addr, self.driver.rpc_timeout)?;
        channel.ping(ping)
    }
}

impl Drop for Gossiper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl GossipHandler for Gossiper {
    fn handle_syn(&self, syn: DigestSyn) -> Result<DigestAck, ProtocolError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(ProtocolError::Stopped);
        }

        if syn.cluster_id != *self.store.cluster_id() {
            metrics::cluster_mismatch(syn.sender_address.as_str());
            self.registry.remove_peer(&syn.sender_address);
            return Err(ProtocolError::ClusterMismatch {
                expected: self.store.cluster_id().clone(),
                got: syn.cluster_id.as_str().to_string(),
            });
        }

        // Peer discovery: the SYN itself proves the sender exists.
        self.registry.add_peer(&syn.sender_address);

        let examination = self.store.examine_digests(&syn.digests);
        tracing::debug!(
            "SYN from {}: {} digests, replying with {} states and {} requests",
            syn.sender_address,
            syn.digests.len(),
            examination.endpoint_states.len(),
            examination.request_digests.len()
        );

        Ok(DigestAck {
            endpoint_states: examination
                .endpoint_states
                .iter()
                .map(|(node_id, state)| EndpointStateWire::from_state(node_id, state))
                .collect(),
            request_digests: examination.request_digests,
        })
    }

    fn handle_ack2(&self, ack2: DigestAck2) -> Result<(), ProtocolError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(ProtocolError::Stopped);
        }
        apply_states(&self.store, &self.registry, ack2.endpoint_states);
        Ok(())
    }

    fn handle_ping(&self, ping: HeartbeatPing) -> Result<HeartbeatPong, ProtocolError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(ProtocolError::Stopped);
        }
        tracing::debug!("heartbeat probe from {} (gen {})", ping.node_id, ping.generation);
        Ok(HeartbeatPong {
            node_id: self.store.node_id().clone(),
            timestamp: WallClock::now(),
        })
    }
}

#[derive(Clone)]
struct RoundDriver {
    store: Arc<StateStore>,
    registry: Arc<PeerRegistry>,
    dialer: Arc<dyn Dialer>,
    cluster_id: ClusterId,
    sender_address: PeerAddr,
    rpc_timeout: Duration,
}

impl RoundDriver {
    fn run_round(&self, round: u64) {
        let digests = self.store.snapshot_digests();
        let targets = self.registry.sample(round);
        for addr in targets.addresses() {
            self.gossip_to(&addr, digests.clone());
        }
    }

    fn gossip_to(&self, addr: &PeerAddr, digests: Vec<Digest>) {
        let syn = DigestSyn {
            cluster_id: self.cluster_id.clone(),
            sender_address: self.sender_address.clone(),
            digests,
        };

        let ack = self
            .dialer
            .dial(addr, self.rpc_timeout)
            .and_then(|mut channel| channel.exchange_syn(syn).map(|ack| (ack, channel)));

        let (ack, mut channel) = match ack {
            Ok(ok) => ok,
            Err(err) => {
                tracing::warn!("gossip round to {addr} failed: {err}");
                metrics::syn_failed(addr.as_str());
                if self.registry.record_failure(addr) {
                    metrics::peer_unreachable(addr.as_str());
                }
                return;
            }
        };

        metrics::syn_sent(addr.as_str());
        self.registry.mark_live(addr);

        apply_states(&self.store, &self.registry, ack.endpoint_states);

        if ack.request_digests.is_empty() {
            return;
        }
        let states = self.store.states_for(&ack.request_digests);
        if states.is_empty() {
            return;
        }
        let reply = DigestAck2 {
            endpoint_states: states
                .iter()
                .map(|(node_id, state)| EndpointStateWire::from_state(node_id, state))
                .collect(),
        };
        match channel.send_ack2(reply) {
            Ok(()) => metrics::ack2_sent(addr.as_str()),
            Err(err) => {
                tracing::warn!("gossip reply to {addr} failed: {err}");
                if self.registry.record_failure(addr) {
                    metrics::peer_unreachable(addr.as_str());
                }
            }
        }
    }
}

/// Merge a batch of wire states and feed discoveries back into the
/// registry. The store's write lock is released before any registry
/// call.
fn apply_states(store: &StateStore, registry: &PeerRegistry, states: Vec<EndpointStateWire>) {
    let now = WallClock::now();
    let mut accepted = 0u64;
    let mut partial = 0u64;
    let mut rejected = 0u64;

    for wire in states {
        let (node_id, state) = wire.into_state();
        match store.apply_merge(&node_id, &state, now) {
            MergeOutcome::Accepted => accepted += 1,
            MergeOutcome::PartiallyApplied => partial += 1,
            MergeOutcome::Rejected => {
                rejected += 1;
                continue;
            }
        }
        // An advanced entry may carry a transport address we have not
        // seen; that is how the registry learns about third parties.
        if let Some(entry) = state.app_state(&AppStateKey::addr())
            && let Ok(addr) = PeerAddr::new(entry.value.clone())
        {
            registry.add_peer(&addr);
        }
    }

    if accepted > 0 {
        metrics::merge_accepted(accepted);
    }
    if partial > 0 {
        metrics::merge_partial(partial);
    }
    if rejected > 0 {
        metrics::merge_rejected(rejected);
    }
}

fn run_ticker_loop(interval: Duration, shutdown: Arc<AtomicBool>, mut work: impl FnMut()) {
    let ticker = crossbeam::channel::tick(interval);
    loop {
        crossbeam::select! {
            recv(ticker) -> _ => work(),
            recv(crossbeam::channel::after(Duration::from_millis(50))) -> _ => {}
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
    }
}
