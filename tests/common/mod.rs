//! Shared fixtures: an in-memory loopback network and cluster builder.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cluster_gossip::{
    ClusterId, Dialer, DigestAck, DigestAck2, DigestSyn, GossipConfig, GossipHandler, Gossiper,
    HeartbeatPing, HeartbeatPong, NodeId, PeerAddr, PeerChannel, TransportError,
};

/// Install a fmt subscriber once so `RUST_LOG` works in tests.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// A process-local "network": dialing an address calls the registered
/// handler directly. Failures are simulated by deregistering.
#[derive(Default)]
pub struct LoopbackNetwork {
    handlers: Mutex<BTreeMap<PeerAddr, Arc<dyn GossipHandler>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, addr: PeerAddr, handler: Arc<dyn GossipHandler>) {
        self.handlers.lock().unwrap().insert(addr, handler);
    }

    pub fn deregister(&self, addr: &PeerAddr) {
        self.handlers.lock().unwrap().remove(addr);
    }
}

impl Dialer for LoopbackNetwork {
    fn dial(
        &self,
        addr: &PeerAddr,
        _timeout: Duration,
    ) -> Result<Box<dyn PeerChannel>, TransportError> {
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(addr)
            .cloned()
            .ok_or_else(|| TransportError::InvalidAddress {
                addr: addr.as_str().to_string(),
            })?;
        Ok(Box::new(LoopbackChannel { handler }))
    }
}

struct LoopbackChannel {
    handler: Arc<dyn GossipHandler>,
}

impl PeerChannel for LoopbackChannel {
    fn exchange_syn(&mut self, syn: DigestSyn) -> Result<DigestAck, TransportError> {
        self.handler
            .handle_syn(syn)
            .map_err(|err| TransportError::Rejected {
                reason: err.to_string(),
            })
    }

    fn send_ack2(&mut self, ack2: DigestAck2) -> Result<(), TransportError> {
        self.handler
            .handle_ack2(ack2)
            .map_err(|err| TransportError::Rejected {
                reason: err.to_string(),
            })
    }

    fn ping(&mut self, ping: HeartbeatPing) -> Result<HeartbeatPong, TransportError> {
        self.handler
            .handle_ping(ping)
            .map_err(|err| TransportError::Rejected {
                reason: err.to_string(),
            })
    }
}

pub fn addr_of(name: &str) -> PeerAddr {
    PeerAddr::new(format!("10.0.0.{}:7000", name_index(name))).unwrap()
}

fn name_index(name: &str) -> usize {
    name.bytes().map(|b| b as usize).sum::<usize>() % 200 + 1
}

pub struct TestCluster {
    pub network: Arc<LoopbackNetwork>,
    pub nodes: Vec<Arc<Gossiper>>,
}

impl TestCluster {
    /// Build `names.len()` engines sharing one loopback network. Every
    /// node after the first is seeded with the first node's address.
    /// Tickers are not started; tests drive rounds by hand.
    pub fn build(cluster_id: &str, names: &[&str]) -> Self {
        let network = LoopbackNetwork::new();
        let mut nodes = Vec::new();

        for (index, name) in names.iter().enumerate() {
            let mut config = GossipConfig::new(
                NodeId::new(*name).unwrap(),
                ClusterId::new(cluster_id).unwrap(),
                addr_of(name),
            );
            if index > 0 {
                config.seeds = vec![addr_of(names[0])];
            }

            let node = Arc::new(
                Gossiper::new(config, network.clone() as Arc<dyn Dialer>).unwrap(),
            );
            network.register(addr_of(name), node.clone());
            nodes.push(node);
        }

        Self { network, nodes }
    }

    pub fn node(&self, index: usize) -> &Arc<Gossiper> {
        &self.nodes[index]
    }
}
