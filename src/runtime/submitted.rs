// src/runtime/submitted.rs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::dag::node::DagNodePtr;
use crate::types::NodeId;

/// Completion tracker for nodes handed to executors.
///
/// Only nodes that may still be running are kept; completed ones are pruned
/// whenever the tracker is touched. Every id below the watermark has been
/// registered at some point, which is what lets [`SubmittedOps::is_dead`]
/// tell a finished node from one that is still sitting in the builder.
#[derive(Debug, Default)]
pub struct SubmittedOps {
    state: Mutex<TrackerState>,
}

#[derive(Debug, Default)]
struct TrackerState {
    in_flight: HashMap<NodeId, DagNodePtr>,
    watermark: u64,
}

impl TrackerState {
    fn prune(&mut self) -> usize {
        let before = self.in_flight.len();
        self.in_flight.retain(|_, node| !node.is_complete());
        before - self.in_flight.len()
    }
}

impl SubmittedOps {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_with_submission<'a>(&self, nodes: impl IntoIterator<Item = &'a DagNodePtr>) {
        let mut state = self.lock();
        for node in nodes {
            state.watermark = state.watermark.max(node.id().0 + 1);
            state.in_flight.insert(node.id(), DagNodePtr::clone(node));
        }
        let pruned = state.prune();
        trace!(
            in_flight = state.in_flight.len(),
            pruned,
            watermark = state.watermark,
            "updated completion tracker"
        );
    }

    /// Block until every registered node has completed.
    pub fn wait_for_all(&self) {
        let pending: Vec<DagNodePtr> = self.lock().in_flight.values().cloned().collect();
        for node in &pending {
            node.wait();
        }
        self.lock().prune();
    }

    /// The node with `id`, if it is registered and possibly still running.
    pub fn lookup(&self, id: NodeId) -> Option<DagNodePtr> {
        self.lock().in_flight.get(&id).cloned()
    }

    /// Whether `id` was registered and has finished, so buffer bookkeeping
    /// no longer needs to order anything after it.
    pub fn is_dead(&self, id: NodeId) -> bool {
        let state = self.lock();
        id.0 < state.watermark
            && state
                .in_flight
                .get(&id)
                .is_none_or(|node| node.is_complete())
    }

    /// Number of nodes that may still be running.
    pub fn in_flight(&self) -> usize {
        let mut state = self.lock();
        state.prune();
        state.in_flight.len()
    }
}
