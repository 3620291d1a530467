//! Reconciliation rules for endpoint states and digest comparison.
//!
//! Both directions of the exchange reduce to the same partial order:
//! generation dominates, and within a generation each versioned
//! component independently takes the higher version. Equal versions
//! keep the local value, which makes merging idempotent, commutative,
//! and associative over any set of inputs for a fixed generation.

use std::collections::BTreeMap;

use crate::core::{NodeId, WallClock};
use crate::engine::digest::Digest;
use crate::engine::endpoint::EndpointState;

/// Result of applying one incoming endpoint state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Entry inserted, replaced wholesale, or every incoming component
    /// advanced the local entry.
    Accepted,
    /// Same generation; some but not all incoming components advanced.
    PartiallyApplied,
    /// Nothing changed: stale generation, nothing newer, or an attempt
    /// to overwrite the local node's own entry.
    Rejected,
}

impl MergeOutcome {
    pub fn advanced(self) -> bool {
        !matches!(self, MergeOutcome::Rejected)
    }
}

/// Merge `incoming` into an existing entry of the same node.
///
/// The caller has already handled the no-local-entry and local-authority
/// cases; this covers the three generation relations.
pub fn merge_endpoint(
    local: &mut EndpointState,
    incoming: &EndpointState,
    now: WallClock,
) -> MergeOutcome {
    if incoming.generation() < local.generation() {
        return MergeOutcome::Rejected;
    }

    if incoming.generation() > local.generation() {
        // Node restarted: the new incarnation invalidates everything we
        // held under the old generation.
        *local = incoming.clone();
        local.is_alive = true;
        local.update_timestamp = now;
        return MergeOutcome::Accepted;
    }

    let mut advanced = 0usize;
    let mut considered = 1usize;

    if incoming.heartbeat.version > local.heartbeat.version {
        local.heartbeat.version = incoming.heartbeat.version;
        advanced += 1;
    }

    for (key, entry) in &incoming.app_states {
        considered += 1;
        match local.app_states.get_mut(key) {
            None => {
                local.app_states.insert(key.clone(), entry.clone());
                advanced += 1;
            }
            Some(existing) if entry.version > existing.version => {
                *existing = entry.clone();
                advanced += 1;
            }
            Some(_) => {}
        }
    }

    if advanced == 0 {
        return MergeOutcome::Rejected;
    }

    local.is_alive = true;
    local.update_timestamp = now;
    if advanced == considered {
        MergeOutcome::Accepted
    } else {
        MergeOutcome::PartiallyApplied
    }
}

/// What a SYN receiver sends back: full states where it is ahead,
/// request digests where it is behind.
#[derive(Debug, Default)]
pub struct DigestExamination {
    pub endpoint_states: Vec<(NodeId, EndpointState)>,
    pub request_digests: Vec<Digest>,
}

/// Compare an incoming digest list against the local endpoint map.
///
/// For every digest: if the sender is ahead we request (advertising how
/// far we got, so the reply carries only the delta); if we are ahead we
/// attach our full state. Local endpoints the sender did not mention at
/// all are attached too - that is how new nodes propagate.
pub fn examine_digests(
    endpoints: &BTreeMap<NodeId, EndpointState>,
    digests: &[Digest],
) -> DigestExamination {
    let mut examination = DigestExamination::default();

    for digest in digests {
        let Some(local) = endpoints.get(&digest.node_id) else {
            examination
                .request_digests
                .push(Digest::request_all(digest.node_id.clone()));
            continue;
        };

        if digest.generation > local.generation() {
            examination
                .request_digests
                .push(Digest::of(&digest.node_id, local));
        } else if digest.generation < local.generation() {
            examination
                .endpoint_states
                .push((digest.node_id.clone(), local.clone()));
        } else if digest.max_version > local.max_version() {
            examination
                .request_digests
                .push(Digest::of(&digest.node_id, local));
        } else if digest.max_version < local.max_version() {
            examination
                .endpoint_states
                .push((digest.node_id.clone(), local.clone()));
        }
    }

    for (node_id, state) in endpoints {
        if !digests.iter().any(|d| &d.node_id == node_id) {
            examination
                .endpoint_states
                .push((node_id.clone(), state.clone()));
        }
    }

    examination
}
