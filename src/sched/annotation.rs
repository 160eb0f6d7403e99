// src/sched/annotation.rs

//! Per-node scheduling decisions, produced by the scheduler and consumed by
//! the backend executors.

use std::fmt;

use crate::dag::node::DagNodePtr;
use crate::types::{BackendId, DeviceId};

/// Where a node runs: a device and a lane index into that device's lane table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LanePlacement {
    pub device: DeviceId,
    pub lane: usize,
}

impl fmt::Display for LanePlacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} lane {}", self.device, self.lane)
    }
}

/// How a dependency between two placed nodes is enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitKind {
    /// Same in-order lane: ordering is implied.
    SameLane,
    /// Different lane of the same backend: wait on a native event.
    SameBackend,
    /// Different backend: wait on an exported event.
    External,
}

/// A synchronization step attached to a node.
#[derive(Debug, Clone)]
pub enum SyncPrimitive {
    /// Record a marker just before the node (profiling).
    EventBefore,
    /// Record the node's completion event.
    EventAfter,
    /// Wait for `on` before running the node.
    Wait { on: DagNodePtr, kind: WaitKind },
}

impl SyncPrimitive {
    pub fn wait_kind(&self) -> Option<WaitKind> {
        match self {
            SyncPrimitive::Wait { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    pub fn waited_node(&self) -> Option<&DagNodePtr> {
        match self {
            SyncPrimitive::Wait { on, .. } => Some(on),
            _ => None,
        }
    }
}

/// Everything the executor needs to submit one node.
#[derive(Debug, Clone, Default)]
pub struct NodeSchedulingAnnotation {
    /// Backend whose executor handles the node. `None` until placed.
    pub executor: Option<BackendId>,
    pub placement: Option<LanePlacement>,
    /// Effective predecessors still in flight when the graph was planned.
    pub dependencies: Vec<DagNodePtr>,
    pub waits: Vec<SyncPrimitive>,
    pub events: Vec<SyncPrimitive>,
}

impl NodeSchedulingAnnotation {
    pub fn has_event_before(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e, SyncPrimitive::EventBefore))
    }
}
