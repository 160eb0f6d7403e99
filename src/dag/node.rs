// src/dag/node.rs

use std::sync::{Arc, OnceLock};

use tracing::warn;

use crate::dag::hints::ExecutionHints;
use crate::dag::operation::Operation;
use crate::exec::queue::QueueEvent;
use crate::sched::annotation::LanePlacement;
use crate::types::NodeId;

pub type DagNodePtr = Arc<DagNode>;

/// What happened to a node once its graph was handed to an executor.
#[derive(Debug, Clone)]
pub enum NodeStatus {
    /// Optimized away by the expander; nothing was submitted. The node
    /// stands for the work of `after`, its effective predecessors, and is
    /// complete only once they are.
    Skipped { after: Vec<DagNodePtr> },
    Submitted {
        placement: LanePlacement,
        /// Marker recorded just before submission (profiling only).
        before: Option<QueueEvent>,
        completion: QueueEvent,
    },
    /// The node reuses the result of `target`.
    Forwarded {
        target: NodeId,
        placement: Option<LanePlacement>,
        completion: Option<QueueEvent>,
    },
    /// The native queue rejected the node, or one of its dependencies failed.
    Failed { reason: String },
}

/// One scheduled operation in a dependency graph.
///
/// Predecessors are referenced by id. The node's status is written exactly
/// once, by the executor that handles it; until then the node is in flight.
#[derive(Debug)]
pub struct DagNode {
    id: NodeId,
    operation: Operation,
    requirements: Vec<NodeId>,
    hints: ExecutionHints,
    status: OnceLock<NodeStatus>,
}

impl DagNode {
    pub(crate) fn new(
        id: NodeId,
        operation: Operation,
        requirements: Vec<NodeId>,
        hints: ExecutionHints,
    ) -> Self {
        Self {
            id,
            operation,
            requirements,
            hints,
            status: OnceLock::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Direct predecessors, sorted by id.
    pub fn requirements(&self) -> &[NodeId] {
        &self.requirements
    }

    pub fn hints(&self) -> &ExecutionHints {
        &self.hints
    }

    pub fn status(&self) -> Option<&NodeStatus> {
        self.status.get()
    }

    pub(crate) fn mark(&self, status: NodeStatus) {
        if self.status.set(status).is_err() {
            warn!(node = %self.id, "node status already recorded; ignoring second update");
        }
    }

    /// The executor has handled this node (successfully or not).
    pub fn is_submitted(&self) -> bool {
        self.status.get().is_some()
    }

    pub fn has_failed(&self) -> bool {
        matches!(self.status.get(), Some(NodeStatus::Failed { .. }))
    }

    /// Whether nothing of this node is still running on a device.
    pub fn is_complete(&self) -> bool {
        match self.status.get() {
            None => false,
            Some(NodeStatus::Failed { .. }) => true,
            Some(NodeStatus::Skipped { after }) => after.iter().all(|n| n.is_complete()),
            Some(NodeStatus::Submitted { completion, .. }) => completion.is_complete(),
            Some(NodeStatus::Forwarded { completion, .. }) => {
                completion.as_ref().is_none_or(|e| e.is_complete())
            }
        }
    }

    pub fn completion_event(&self) -> Option<QueueEvent> {
        match self.status.get() {
            Some(NodeStatus::Submitted { completion, .. }) => Some(Arc::clone(completion)),
            Some(NodeStatus::Forwarded { completion, .. }) => completion.clone(),
            _ => None,
        }
    }

    pub fn placement(&self) -> Option<LanePlacement> {
        match self.status.get() {
            Some(NodeStatus::Submitted { placement, .. }) => Some(*placement),
            Some(NodeStatus::Forwarded { placement, .. }) => *placement,
            _ => None,
        }
    }

    /// Block until the node's device work (if any) has finished.
    pub fn wait(&self) {
        if let Some(NodeStatus::Skipped { after }) = self.status.get() {
            for node in after {
                node.wait();
            }
        } else if let Some(event) = self.completion_event() {
            event.wait();
        }
    }

    /// Nodes a skipped node stands for; empty for any other status.
    pub fn stands_for(&self) -> &[DagNodePtr] {
        match self.status.get() {
            Some(NodeStatus::Skipped { after }) => after,
            _ => &[],
        }
    }
}
