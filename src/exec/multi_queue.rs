// src/exec/multi_queue.rs

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, error, trace};

use crate::config::LaneSection;
use crate::dag::hints::Expansion;
use crate::dag::node::{DagNodePtr, NodeStatus};
use crate::dag::operation::Operation;
use crate::errors::{LanedagError, Result};
use crate::sched::annotation::{
    LanePlacement, NodeSchedulingAnnotation, SyncPrimitive, WaitKind,
};
use crate::types::{BackendId, DeviceId, ExecutorKind, NodeId};

use super::backend::{BackendExecutor, DagSubmission, SubmissionReport};
use super::queue::{InorderQueue, QueueFactory};

/// Executor for backends that expose several in-order queues per device.
///
/// Each device gets `lanes.memcpy` copy lanes followed by `lanes.kernel`
/// kernel lanes. Queues are created on first use and cached until the
/// executor is dropped.
pub struct MultiQueueExecutor {
    backend: BackendId,
    devices: Vec<DeviceId>,
    lanes: LaneSection,
    factory: QueueFactory,
    queues: Mutex<HashMap<LanePlacement, Arc<dyn InorderQueue>>>,
}

impl fmt::Debug for MultiQueueExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiQueueExecutor")
            .field("backend", &self.backend)
            .field("devices", &self.devices)
            .field("lanes", &self.lanes)
            .finish_non_exhaustive()
    }
}

impl MultiQueueExecutor {
    /// # Panics
    ///
    /// If `devices` is empty, contains a device of another backend, or
    /// either lane count is zero.
    pub fn new(
        backend: BackendId,
        devices: Vec<DeviceId>,
        lanes: LaneSection,
        factory: QueueFactory,
    ) -> Self {
        assert!(!devices.is_empty(), "{backend} executor needs at least one device");
        assert!(
            devices.iter().all(|d| d.backend == backend),
            "{backend} executor given a device of another backend: {devices:?}"
        );
        assert!(
            lanes.memcpy >= 1 && lanes.kernel >= 1,
            "{backend} executor needs at least one memcpy and one kernel lane, got {lanes:?}"
        );
        Self {
            backend,
            devices,
            lanes,
            factory,
            queues: Mutex::new(HashMap::new()),
        }
    }

    fn check_device(&self, device: DeviceId) {
        assert!(
            self.devices.contains(&device),
            "{device} is not managed by the {} executor",
            self.backend
        );
    }

    /// Number of queues created so far.
    pub fn queue_count(&self) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn queue(&self, placement: LanePlacement) -> Result<Arc<dyn InorderQueue>> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(queue) = queues.get(&placement) {
            return Ok(Arc::clone(queue));
        }

        let queue: Arc<dyn InorderQueue> = (self.factory)(placement.device)
            .map_err(|e| LanedagError::QueueCreation {
                device: placement.device,
                reason: e.to_string(),
            })?
            .into();
        debug!(%placement, "created native queue");
        queues.insert(placement, Arc::clone(&queue));
        Ok(queue)
    }

    fn submit_node(
        &self,
        operation: &Operation,
        placement: LanePlacement,
        annotation: &NodeSchedulingAnnotation,
    ) -> Result<NodeStatus> {
        let queue = self.queue(placement)?;

        let before = if annotation.has_event_before() {
            Some(queue.insert_event()?)
        } else {
            None
        };

        for wait in &annotation.waits {
            let SyncPrimitive::Wait { on, kind } = wait else {
                continue;
            };
            match (kind, on.completion_event()) {
                (WaitKind::SameLane, _) => {
                    trace!(on = %on.id(), %placement, "same-lane dependency is implied");
                }
                (_, None) => {
                    trace!(on = %on.id(), "dependency has no device event; nothing to wait on");
                }
                (WaitKind::SameBackend, Some(event)) => queue.wait_event(&event)?,
                (WaitKind::External, Some(event)) => queue.wait_external_event(&event)?,
            }
        }

        queue.submit(operation)?;
        let completion = queue.insert_event()?;

        Ok(NodeStatus::Submitted {
            placement,
            before,
            completion,
        })
    }

    fn forward(
        &self,
        node: &DagNodePtr,
        target: NodeId,
        submission: &DagSubmission<'_>,
        report: &mut SubmissionReport,
    ) {
        let interpreter = submission.interpreter;
        let Some(index) = interpreter.enumerator().index_of(target) else {
            panic!("{} forwarded to {target}, which is not part of the graph", node.id());
        };
        let target_node = interpreter.node(index);

        if target_node.has_failed() {
            fail(node, format!("forwarding target {target} failed"), report);
            return;
        }

        node.mark(NodeStatus::Forwarded {
            target,
            placement: target_node.placement(),
            completion: target_node.completion_event(),
        });
        report.forwarded += 1;
    }
}

impl BackendExecutor for MultiQueueExecutor {
    fn backend(&self) -> BackendId {
        self.backend
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::InorderQueue
    }

    fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    fn memcpy_lanes(&self, device: DeviceId) -> Range<usize> {
        self.check_device(device);
        0..self.lanes.memcpy
    }

    fn kernel_lanes(&self, device: DeviceId) -> Range<usize> {
        self.check_device(device);
        self.lanes.memcpy..self.lanes.memcpy + self.lanes.kernel
    }

    fn submit_dag(&self, submission: &DagSubmission<'_>, range: Range<usize>) -> SubmissionReport {
        let interpreter = submission.interpreter;
        let mut report = SubmissionReport::default();

        for index in range {
            let annotation = &submission.annotations[index];
            if annotation.executor != Some(self.backend) {
                continue;
            }
            let node = interpreter.node(index);

            let operation = match interpreter.expansion(index) {
                Expansion::Forwarded(target) => {
                    self.forward(node, *target, submission, &mut report);
                    continue;
                }
                Expansion::OptimizedAway => None,
                Expansion::Replaced(op) => Some(op),
                Expansion::Kept => Some(node.operation()),
            };

            if let Some(reason) = blocked_by_failure(node, &annotation.dependencies) {
                debug!(node = %node.id(), %reason, "not running dependant of failed work");
                fail(node, reason, &mut report);
                continue;
            }

            let Some(operation) = operation else {
                trace!(node = %node.id(), "optimized away");
                node.mark(NodeStatus::Skipped {
                    after: annotation.dependencies.clone(),
                });
                report.skipped += 1;
                continue;
            };

            assert!(
                !operation.is_memory_requirement(),
                "{} reached the {} executor as a raw memory requirement",
                node.id(),
                self.backend
            );
            let Some(placement) = annotation.placement else {
                panic!("{} reached the {} executor without a lane", node.id(), self.backend);
            };

            match self.submit_node(operation, placement, annotation) {
                Ok(status) => {
                    debug!(node = %node.id(), kind = operation.kind_name(), %placement, "submitted");
                    node.mark(status);
                    report.submitted += 1;
                    for access in node.operation().accesses() {
                        if access.mode.writes() && !access.mode.needs_data() {
                            access.region.clear_failed_write();
                        }
                    }
                }
                Err(e) => {
                    error!(node = %node.id(), %placement, error = %e, "native submission failed");
                    fail(node, e.to_string(), &mut report);
                }
            }
        }

        report
    }

    fn wait_for_node_same_lane(&self, node: &DagNodePtr) -> SyncPrimitive {
        SyncPrimitive::Wait {
            on: DagNodePtr::clone(node),
            kind: WaitKind::SameLane,
        }
    }
}

/// Why `node` must not run: one of its dependencies failed, or a region it
/// reads still holds the output of a failed write from an earlier graph.
fn blocked_by_failure(node: &DagNodePtr, dependencies: &[DagNodePtr]) -> Option<String> {
    if let Some(failed) = dependencies.iter().find(|d| d.has_failed()) {
        return Some(format!("dependency {} failed", failed.id()));
    }
    node.operation()
        .accesses()
        .iter()
        .filter(|a| a.mode.needs_data())
        .find_map(|a| {
            a.region
                .failed_writer()
                .map(|writer| format!("buffer#{} was last written by failed {writer}", a.buffer().0))
        })
}

/// Mark `node` failed and leave its written regions marked for later readers.
fn fail(node: &DagNodePtr, reason: String, report: &mut SubmissionReport) {
    for access in node.operation().accesses() {
        if access.mode.writes() {
            access.region.mark_failed_write(node.id());
        }
    }
    node.mark(NodeStatus::Failed {
        reason: reason.clone(),
    });
    report.record_failure(node.id(), reason);
}
