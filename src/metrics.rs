//! Minimal metrics emission helpers.
//!
//! Counters are emitted as structured tracing events by default. A test
//! sink can be installed to capture emissions in unit tests.

use std::sync::{Arc, OnceLock, RwLock};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricEvent {
    pub name: &'static str,
    pub value: u64,
    pub labels: Vec<(&'static str, String)>,
}

pub trait MetricSink: Send + Sync {
    fn record(&self, event: MetricEvent);
}

struct TracingSink;

impl MetricSink for TracingSink {
    fn record(&self, event: MetricEvent) {
        tracing::info!(
            target: "metrics",
            metric = event.name,
            value = event.value,
            labels = ?event.labels
        );
    }
}

static METRIC_SINK: OnceLock<RwLock<Arc<dyn MetricSink>>> = OnceLock::new();

fn sink() -> Arc<dyn MetricSink> {
    METRIC_SINK
        .get_or_init(|| RwLock::new(Arc::new(TracingSink)))
        .read()
        .expect("metrics sink lock poisoned")
        .clone()
}

pub fn set_sink(new_sink: Arc<dyn MetricSink>) {
    let lock = METRIC_SINK.get_or_init(|| RwLock::new(Arc::new(TracingSink)));
    *lock.write().expect("metrics sink lock poisoned") = new_sink;
}

fn counter(name: &'static str, value: u64, labels: Vec<(&'static str, String)>) {
    sink().record(MetricEvent {
        name,
        value,
        labels,
    });
}

pub fn syn_sent(peer: &str) {
    counter("gossip_syn_sent", 1, vec![("peer", peer.to_string())]);
}

pub fn syn_failed(peer: &str) {
    counter("gossip_syn_failed", 1, vec![("peer", peer.to_string())]);
}

pub fn ack2_sent(peer: &str) {
    counter("gossip_ack2_sent", 1, vec![("peer", peer.to_string())]);
}

pub fn merge_accepted(count: u64) {
    counter("gossip_merge_accepted", count, Vec::new());
}

pub fn merge_partial(count: u64) {
    counter("gossip_merge_partial", count, Vec::new());
}

pub fn merge_rejected(count: u64) {
    counter("gossip_merge_rejected", count, Vec::new());
}

pub fn cluster_mismatch(peer: &str) {
    counter(
        "gossip_cluster_mismatch",
        1,
        vec![("peer", peer.to_string())],
    );
}

pub fn peer_unreachable(peer: &str) {
    counter(
        "gossip_peer_unreachable",
        1,
        vec![("peer", peer.to_string())],
    );
}
