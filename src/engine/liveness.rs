//! Liveness watcher: demote endpoints that went quiet.
//!
//! A periodic sweep compares each non-local endpoint's update timestamp
//! against the staleness threshold. Promotion back to alive happens in
//! the merge path the moment fresh state arrives; the watcher only ever
//! demotes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::core::WallClock;
use crate::engine::store::StateStore;

pub fn run_liveness_loop(
    store: Arc<StateStore>,
    shutdown: Arc<AtomicBool>,
    interval: Duration,
    suspect_after: Duration,
) {
    let ticker = crossbeam::channel::tick(interval);
    loop {
        crossbeam::select! {
            recv(ticker) -> _ => {
                let flipped = store.sweep_stale(WallClock::now(), suspect_after);
                for node_id in &flipped {
                    tracing::info!(
                        "marking {node_id} as down: no update in {}s",
                        suspect_after.as_secs()
                    );
                }
            }
            recv(crossbeam::channel::after(Duration::from_millis(50))) -> _ => {}
        }
        if shutdown.load(Ordering::Relaxed) {
            break;
        }
    }
}
