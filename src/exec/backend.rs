// src/exec/backend.rs

//! Pluggable backend executor abstraction.
//!
//! The scheduler talks to a `BackendExecutor` per backend instead of to
//! native queues directly. Production backends wrap a device runtime behind
//! a [`QueueFactory`](super::queue::QueueFactory); tests plug a recording
//! fake into the same factory.

use std::ops::Range;

use crate::dag::node::DagNodePtr;
use crate::dag::operation::LaneClass;
use crate::errors::LanedagError;
use crate::sched::annotation::{NodeSchedulingAnnotation, SyncPrimitive, WaitKind};
use crate::sched::interpreter::DagInterpreter;
use crate::types::{BackendId, DeviceId, ExecutorKind, NodeId};

/// One scheduled graph as seen by an executor: the expanded nodes plus the
/// scheduling annotation of each, indexed by the graph's enumerator.
#[derive(Debug, Clone, Copy)]
pub struct DagSubmission<'a> {
    pub interpreter: &'a DagInterpreter,
    pub annotations: &'a [NodeSchedulingAnnotation],
}

/// Outcome of handing (part of) a graph to executors.
#[derive(Debug, Default)]
pub struct SubmissionReport {
    pub submitted: usize,
    pub skipped: usize,
    pub forwarded: usize,
    pub failures: Vec<LanedagError>,
}

impl SubmissionReport {
    pub fn record_failure(&mut self, node: NodeId, reason: impl Into<String>) {
        self.failures.push(LanedagError::Submission {
            node,
            reason: reason.into(),
        });
    }

    pub fn merge(&mut self, other: SubmissionReport) {
        self.submitted += other.submitted;
        self.skipped += other.skipped;
        self.forwarded += other.forwarded;
        self.failures.extend(other.failures);
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Ids of the nodes that failed, in the order the failures were recorded.
    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.failures
            .iter()
            .filter_map(|e| match e {
                LanedagError::Submission { node, .. } => Some(*node),
                _ => None,
            })
            .collect()
    }
}

/// Trait abstracting how one backend runs scheduled graph nodes.
pub trait BackendExecutor: Send + Sync {
    fn backend(&self) -> BackendId;

    fn kind(&self) -> ExecutorKind;

    fn is_inorder_queue(&self) -> bool {
        self.kind() == ExecutorKind::InorderQueue
    }

    fn is_outoforder_queue(&self) -> bool {
        self.kind() == ExecutorKind::OutOfOrderQueue
    }

    fn is_taskgraph(&self) -> bool {
        self.kind() == ExecutorKind::TaskGraph
    }

    /// Devices this executor can place work on, in a stable order.
    fn devices(&self) -> &[DeviceId];

    fn memcpy_lanes(&self, device: DeviceId) -> Range<usize>;

    fn kernel_lanes(&self, device: DeviceId) -> Range<usize>;

    fn lanes_for(&self, device: DeviceId, class: LaneClass) -> Range<usize> {
        match class {
            LaneClass::Memcpy => self.memcpy_lanes(device),
            LaneClass::Kernel => self.kernel_lanes(device),
        }
    }

    /// Submit every node in `range` (submission order) whose annotation
    /// names this executor. Native failures are reported, never panicked on.
    fn submit_dag(&self, submission: &DagSubmission<'_>, range: Range<usize>) -> SubmissionReport;

    fn event_before(&self) -> SyncPrimitive {
        SyncPrimitive::EventBefore
    }

    fn event_after(&self) -> SyncPrimitive {
        SyncPrimitive::EventAfter
    }

    fn wait_for_node_same_lane(&self, node: &DagNodePtr) -> SyncPrimitive;

    fn wait_for_node_same_backend(&self, node: &DagNodePtr) -> SyncPrimitive {
        SyncPrimitive::Wait {
            on: DagNodePtr::clone(node),
            kind: WaitKind::SameBackend,
        }
    }

    fn wait_for_node_same_external(&self, node: &DagNodePtr) -> SyncPrimitive {
        SyncPrimitive::Wait {
            on: DagNodePtr::clone(node),
            kind: WaitKind::External,
        }
    }
}
