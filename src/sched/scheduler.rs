// src/sched/scheduler.rs

//! Lane placement and synchronization planning.
//!
//! The scheduler turns a frozen graph into one [`NodeSchedulingAnnotation`]
//! per node and hands contiguous same-executor segments of the submission
//! order to the backend executors. Planning is a pure function of the graph,
//! its hints, the regions' validity and the completion tracker: lane
//! counters are reset on every submit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use tracing::{debug, info, trace, warn};

use crate::config::SchedulerSection;
use crate::dag::graph::{Dag, DagEnumerator};
use crate::dag::hints::Expansion;
use crate::dag::node::{DagNodePtr, NodeStatus};
use crate::dag::operation::LaneClass;
use crate::exec::backend::{BackendExecutor, DagSubmission, SubmissionReport};
use crate::runtime::submitted::SubmittedOps;
use crate::types::{BackendId, BufferId, DeviceId, LanePolicy, NodeId};

use super::annotation::{LanePlacement, NodeSchedulingAnnotation};
use super::interpreter::DagInterpreter;

/// A graph whose placement and synchronization have been decided but which
/// has not been handed to any executor yet.
#[derive(Debug)]
pub struct PlannedDag {
    pub interpreter: DagInterpreter,
    pub annotations: Vec<NodeSchedulingAnnotation>,
}

/// A graph after submission.
#[derive(Debug)]
pub struct ScheduledDag {
    pub interpreter: DagInterpreter,
    pub annotations: Vec<NodeSchedulingAnnotation>,
    pub report: SubmissionReport,
}

pub struct Scheduler {
    executors: Vec<Arc<dyn BackendExecutor>>,
    policy: LanePolicy,
    profiling: bool,
    default_device: Option<DeviceId>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backends: Vec<BackendId> = self.executors.iter().map(|e| e.backend()).collect();
        f.debug_struct("Scheduler")
            .field("backends", &backends)
            .field("policy", &self.policy)
            .field("profiling", &self.profiling)
            .field("default_device", &self.default_device)
            .finish()
    }
}

/// Per-submit lane bookkeeping.
#[derive(Default)]
struct LaneState {
    round_robin: HashMap<(DeviceId, LaneClass), usize>,
    load: HashMap<LanePlacement, usize>,
}

impl LaneState {
    fn pick(&mut self, policy: LanePolicy, device: DeviceId, class: LaneClass, lanes: Range<usize>) -> usize {
        match policy {
            LanePolicy::RoundRobin => {
                let counter = self.round_robin.entry((device, class)).or_insert(0);
                let lane = lanes.start + *counter % lanes.len();
                *counter += 1;
                lane
            }
            LanePolicy::LeastLoaded => lanes
                .min_by_key(|&lane| (self.load_of(LanePlacement { device, lane }), lane))
                .unwrap_or_else(|| panic!("empty {class:?} lane range on {device}")),
        }
    }

    fn load_of(&self, placement: LanePlacement) -> usize {
        self.load.get(&placement).copied().unwrap_or(0)
    }

    fn assign(&mut self, placement: LanePlacement) {
        *self.load.entry(placement).or_insert(0) += 1;
    }
}

impl Scheduler {
    /// # Panics
    ///
    /// If two executors claim the same backend.
    pub fn new(executors: Vec<Arc<dyn BackendExecutor>>, config: &SchedulerSection) -> Self {
        let mut seen = BTreeSet::new();
        for executor in &executors {
            assert!(
                seen.insert(executor.backend()),
                "more than one executor registered for {}",
                executor.backend()
            );
        }
        Self {
            executors,
            policy: config.lane_policy,
            profiling: config.profiling,
            default_device: config.default_device,
        }
    }

    pub fn executors(&self) -> &[Arc<dyn BackendExecutor>] {
        &self.executors
    }

    pub fn executor_for(&self, backend: BackendId) -> Option<&Arc<dyn BackendExecutor>> {
        self.executors.iter().find(|e| e.backend() == backend)
    }

    fn require_executor(&self, backend: BackendId) -> &Arc<dyn BackendExecutor> {
        self.executor_for(backend)
            .unwrap_or_else(|| panic!("no executor registered for {backend}"))
    }

    fn fallback_device(&self) -> DeviceId {
        if let Some(device) = self.default_device {
            return device;
        }
        match self.executors.first().and_then(|e| e.devices().first()) {
            Some(device) => *device,
            None => panic!("scheduler has no executor to place work on"),
        }
    }

    /// Expand the graph and decide placement and synchronization for every
    /// node, without submitting anything.
    pub fn plan(&self, dag: Dag, submitted: &SubmittedOps) -> PlannedDag {
        let enumerator = DagEnumerator::new(&dag);
        let mut annotations: Vec<NodeSchedulingAnnotation> = Vec::with_capacity(dag.len());
        let mut lanes = LaneState::default();

        // Placement is decided node by node while the expander walks the
        // graph, so kernel writes land on the device the kernel runs on.
        let interpreter = DagInterpreter::with_placement(dag, enumerator, |interpreter, index| {
            let annotation = self.annotate(interpreter, index, &annotations, submitted, &mut lanes);
            let device = annotation.placement.map(|p| p.device);
            annotations.push(annotation);
            device
        });

        // Nodes without an executor of their own ride along with their
        // neighbour so that segments stay as long as possible.
        let mut previous = self.executors.first().map(|e| e.backend());
        for annotation in &mut annotations {
            match annotation.executor {
                Some(backend) => previous = Some(backend),
                None => annotation.executor = previous,
            }
        }

        PlannedDag {
            interpreter,
            annotations,
        }
    }

    fn annotate(
        &self,
        interpreter: &DagInterpreter,
        index: usize,
        annotations: &[NodeSchedulingAnnotation],
        submitted: &SubmittedOps,
        lanes: &mut LaneState,
    ) -> NodeSchedulingAnnotation {
        match interpreter.expansion(index) {
            // Nothing to place, but the node still stands for whatever its
            // predecessors are doing.
            Expansion::OptimizedAway => NodeSchedulingAnnotation {
                dependencies: effective_predecessors(interpreter, submitted, interpreter.node(index)),
                ..Default::default()
            },
            Expansion::Forwarded(target) => {
                let executor = interpreter
                    .enumerator()
                    .index_of(*target)
                    .and_then(|i| annotations[i].executor);
                NodeSchedulingAnnotation {
                    executor,
                    ..Default::default()
                }
            }
            Expansion::Kept | Expansion::Replaced(_) => {
                self.plan_node(interpreter, index, annotations, submitted, lanes)
            }
        }
    }

    fn plan_node(
        &self,
        interpreter: &DagInterpreter,
        index: usize,
        annotations: &[NodeSchedulingAnnotation],
        submitted: &SubmittedOps,
        lanes: &mut LaneState,
    ) -> NodeSchedulingAnnotation {
        let node = interpreter.node(index);
        let Some(operation) = interpreter.operation_to_submit(index) else {
            unreachable!("plan_node called for a node with nothing to submit");
        };

        let placement_of = |pred: &DagNodePtr| -> Option<LanePlacement> {
            match interpreter.enumerator().index_of(pred.id()) {
                Some(i) => annotations[i].placement,
                None => pred.placement(),
            }
        };

        let dependencies = effective_predecessors(interpreter, submitted, node);
        let placed: Vec<(NodeId, LanePlacement, DagNodePtr)> = dependencies
            .iter()
            .filter_map(|pred| placement_of(pred).map(|p| (pred.id(), p, DagNodePtr::clone(pred))))
            .collect();

        let device = interpreter
            .effective_hints(index)
            .bound_device()
            .or_else(|| operation.implied_device())
            .or_else(|| placed.iter().max_by_key(|(id, ..)| *id).map(|(_, p, _)| p.device))
            .unwrap_or_else(|| self.fallback_device());

        let executor = self.require_executor(device.backend);
        let class = operation.lane_class();
        let range = executor.lanes_for(device, class);

        let affinity = placed
            .iter()
            .filter(|(_, p, _)| p.device == device && range.contains(&p.lane))
            .max_by_key(|(id, ..)| *id)
            .map(|(_, p, _)| p.lane);
        let lane = match affinity {
            Some(lane) => lane,
            None => lanes.pick(self.policy, device, class, range),
        };
        let placement = LanePlacement { device, lane };
        lanes.assign(placement);

        // Only the latest predecessor per lane needs an explicit wait: the
        // lane is in-order, so it covers everything before it.
        let mut latest_per_lane: BTreeMap<LanePlacement, (NodeId, &DagNodePtr)> = BTreeMap::new();
        for (id, pred_placement, pred) in &placed {
            let entry = latest_per_lane.entry(*pred_placement).or_insert((*id, pred));
            if *id > entry.0 {
                *entry = (*id, pred);
            }
        }

        let waits = latest_per_lane
            .into_iter()
            .map(|(pred_placement, (_, pred))| {
                if pred_placement == placement && executor.is_inorder_queue() {
                    executor.wait_for_node_same_lane(pred)
                } else if pred_placement.device.backend == device.backend {
                    executor.wait_for_node_same_backend(pred)
                } else {
                    executor.wait_for_node_same_external(pred)
                }
            })
            .collect::<Vec<_>>();

        let mut events = Vec::with_capacity(2);
        if self.profiling {
            events.push(executor.event_before());
        }
        events.push(executor.event_after());

        trace!(
            node = %node.id(),
            %placement,
            waits = waits.len(),
            dependencies = dependencies.len(),
            "planned node"
        );

        NodeSchedulingAnnotation {
            executor: Some(device.backend),
            placement: Some(placement),
            dependencies,
            waits,
            events,
        }
    }

    /// Plan the graph and hand it to the executors, one maximal
    /// same-executor segment at a time, in submission order.
    pub fn submit(&self, dag: Dag, submitted: &SubmittedOps) -> ScheduledDag {
        let PlannedDag {
            interpreter,
            annotations,
        } = self.plan(dag, submitted);

        let mut report = SubmissionReport::default();
        let submission = DagSubmission {
            interpreter: &interpreter,
            annotations: &annotations,
        };

        for (backend, range) in segments(&annotations) {
            debug!(%backend, start = range.start, end = range.end, "submitting segment");
            let executor = self.require_executor(backend);
            report.merge(executor.submit_dag(&submission, range));
        }

        let failed: BTreeSet<BufferId> = interpreter
            .nodes()
            .iter()
            .filter(|n| n.has_failed())
            .flat_map(|n| n.operation().accesses())
            .map(|a| a.buffer())
            .collect();
        if !failed.is_empty() {
            warn!(buffers = failed.len(), "not committing validity of buffers touched by failed nodes");
        }
        interpreter.commit_validity(&failed);

        info!(
            nodes = interpreter.len(),
            submitted = report.submitted,
            skipped = report.skipped,
            forwarded = report.forwarded,
            failures = report.failures.len(),
            "DAG submitted"
        );

        ScheduledDag {
            interpreter,
            annotations,
            report,
        }
    }
}

/// Predecessors of `node` after looking through optimized-away and
/// forwarded nodes. Predecessors of earlier graphs are kept only while the
/// completion tracker still reports them in flight; skipped ones are
/// replaced by the nodes they stand for.
fn effective_predecessors(
    interpreter: &DagInterpreter,
    submitted: &SubmittedOps,
    node: &DagNodePtr,
) -> Vec<DagNodePtr> {
    let mut pending: Vec<NodeId> = node.requirements().to_vec();
    let mut seen = BTreeSet::new();
    let mut found: BTreeMap<NodeId, DagNodePtr> = BTreeMap::new();

    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        match interpreter.enumerator().index_of(id) {
            Some(i) => match interpreter.expansion(i) {
                Expansion::OptimizedAway => {
                    pending.extend_from_slice(interpreter.node(i).requirements())
                }
                Expansion::Forwarded(target) => pending.push(*target),
                Expansion::Kept | Expansion::Replaced(_) => {
                    found.insert(id, DagNodePtr::clone(interpreter.node(i)));
                }
            },
            None => {
                let Some(earlier) = submitted.lookup(id).filter(|n| !n.is_complete()) else {
                    continue;
                };
                if matches!(earlier.status(), Some(NodeStatus::Skipped { .. })) {
                    for stand_in in earlier.stands_for().iter().filter(|n| !n.is_complete()) {
                        found.insert(stand_in.id(), DagNodePtr::clone(stand_in));
                    }
                } else {
                    found.insert(id, earlier);
                }
            }
        }
    }

    found.into_values().collect()
}

/// Maximal runs of consecutive nodes handled by the same executor.
fn segments(annotations: &[NodeSchedulingAnnotation]) -> Vec<(BackendId, Range<usize>)> {
    let mut out: Vec<(BackendId, Range<usize>)> = Vec::new();
    for (index, annotation) in annotations.iter().enumerate() {
        let Some(backend) = annotation.executor else {
            continue;
        };
        if let Some((last, range)) = out.last_mut()
            && *last == backend
            && range.end == index
        {
            range.end = index + 1;
            continue;
        }
        out.push((backend, index..index + 1));
    }
    out
}
