// src/sched/interpreter.rs

//! Expander pass over a frozen graph.
//!
//! For every node the interpreter decides whether its operation is kept,
//! optimized away, replaced by a cheaper equivalent, or forwarded to an
//! earlier node with the same result. The decision is stored as an
//! `ExpanderAnnotation` hint on top of the node's own hints.
//!
//! Data validity is simulated from a snapshot taken at construction and is
//! only written back to the regions by [`DagInterpreter::commit_validity`],
//! so running the pass twice on an unchanged graph gives the same result.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::dag::data_region::DataRegion;
use crate::dag::graph::{Dag, DagEnumerator};
use crate::dag::hints::{ExecutionHint, ExecutionHints, Expansion};
use crate::dag::node::DagNodePtr;
use crate::dag::operation::{CopyEndpoint, KernelLaunch, MemoryCopy, MemoryRequirement, Operation};
use crate::types::{BufferId, DeviceId, NodeId};

type ValidityMap = BTreeMap<BufferId, (Arc<DataRegion>, BTreeSet<DeviceId>)>;

#[derive(Debug)]
pub struct DagInterpreter {
    dag: Dag,
    enumerator: DagEnumerator,
    hints: Vec<ExecutionHints>,
    validity: ValidityMap,
}

impl DagInterpreter {
    /// Expand with kernels assumed to run on their bound device. Writes of
    /// unbound kernels are not reflected in the simulated validity.
    pub fn new(dag: Dag, enumerator: DagEnumerator) -> Self {
        Self::with_placement(dag, enumerator, |interpreter, index| {
            interpreter.effective_hints(index).bound_device()
        })
    }

    /// Expand the graph, asking `place` for the device of every node right
    /// after its expansion is decided.
    ///
    /// `place` is called once per node, in submission order, and may only
    /// look at nodes up to and including `index`. A kernel's writes make the
    /// returned device the only valid copy of the written regions.
    pub fn with_placement(
        dag: Dag,
        enumerator: DagEnumerator,
        mut place: impl FnMut(&DagInterpreter, usize) -> Option<DeviceId>,
    ) -> Self {
        let mut pass = ExpansionPass::default();
        let mut interpreter = Self {
            hints: Vec::with_capacity(dag.len()),
            dag,
            enumerator,
            validity: ValidityMap::new(),
        };

        for index in 0..interpreter.len() {
            let node = DagNodePtr::clone(interpreter.node(index));
            let expansion = pass.expand(index, &node);
            trace!(node = %node.id(), ?expansion, "expander decision");
            let mut hints = node.hints().clone();
            hints.add_hint(ExecutionHint::ExpanderAnnotation(expansion));
            interpreter.hints.push(hints);

            let device = place(&interpreter, index);
            if let (Operation::Kernel(kernel), Some(device)) = (node.operation(), device) {
                pass.record_kernel_writes(kernel, device);
            }
        }

        interpreter.validity = pass.validity;
        debug!(
            nodes = interpreter.len(),
            optimized_away = interpreter.count(Expansion::is_optimized_away),
            replaced = interpreter.count(Expansion::is_operation_replaced),
            forwarded = interpreter.count(Expansion::is_node_forwarded),
            "expanded DAG"
        );
        interpreter
    }

    fn count(&self, pred: impl Fn(&Expansion) -> bool) -> usize {
        (0..self.len()).filter(|&i| pred(self.expansion(i))).count()
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn enumerator(&self) -> &DagEnumerator {
        &self.enumerator
    }

    pub fn nodes(&self) -> &[DagNodePtr] {
        self.dag.nodes()
    }

    pub fn node(&self, index: usize) -> &DagNodePtr {
        &self.dag.nodes()[index]
    }

    pub fn len(&self) -> usize {
        self.dag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.is_empty()
    }

    /// The node's own hints with the expander annotation applied.
    pub fn effective_hints(&self, index: usize) -> &ExecutionHints {
        &self.hints[index]
    }

    pub fn expansion(&self, index: usize) -> &Expansion {
        const KEPT: &Expansion = &Expansion::Kept;
        self.hints[index].expansion().unwrap_or(KEPT)
    }

    /// Expansion of a node by id, `None` if it is not part of this graph.
    pub fn expansion_of(&self, id: NodeId) -> Option<&Expansion> {
        self.enumerator.index_of(id).map(|i| self.expansion(i))
    }

    /// Every node's expansion, in submission order.
    pub fn expansions(&self) -> Vec<Expansion> {
        (0..self.len()).map(|i| self.expansion(i).clone()).collect()
    }

    /// The operation an executor should submit for `index`, or `None` if the
    /// node is optimized away or forwarded.
    pub fn operation_to_submit(&self, index: usize) -> Option<&Operation> {
        match self.expansion(index) {
            Expansion::Kept => Some(self.node(index).operation()),
            Expansion::Replaced(op) => Some(op),
            Expansion::OptimizedAway | Expansion::Forwarded(_) => None,
        }
    }

    /// Regions whose validity the graph changes, with the simulated result.
    pub fn validity_updates(&self) -> impl Iterator<Item = (&Arc<DataRegion>, &BTreeSet<DeviceId>)> {
        self.validity.values().map(|(region, devices)| (region, devices))
    }

    /// Write the simulated validity back to the regions, except for the
    /// buffers listed in `skip`.
    pub(crate) fn commit_validity(&self, skip: &BTreeSet<BufferId>) {
        for (id, (region, devices)) in &self.validity {
            if skip.contains(id) {
                continue;
            }
            region.set_valid_devices(devices.clone());
        }
    }
}

/// Mutable state of one expansion walk.
#[derive(Default)]
struct ExpansionPass {
    validity: ValidityMap,
    /// Index of the last node that logically wrote each buffer.
    last_write: HashMap<BufferId, usize>,
    /// Kept copies that later identical copies may forward to.
    copies: Vec<(usize, NodeId, MemoryCopy)>,
}

impl ExpansionPass {
    fn expand(&mut self, index: usize, node: &DagNodePtr) -> Expansion {
        let expansion = match node.operation() {
            Operation::Requirement(req) => self.expand_requirement(req),
            Operation::Memcpy(copy) => self.expand_copy(index, node.id(), copy),
            Operation::Kernel(_) | Operation::Barrier => Expansion::Kept,
        };

        if !expansion.is_node_forwarded() {
            for access in node.operation().accesses() {
                if access.mode.writes() {
                    self.last_write.insert(access.buffer(), index);
                }
            }
        }
        expansion
    }

    fn record_kernel_writes(&mut self, kernel: &KernelLaunch, device: DeviceId) {
        for access in kernel.accesses.iter().filter(|a| a.mode.writes()) {
            self.valid_set(&access.region).1 = BTreeSet::from([device]);
        }
    }

    fn valid_set(&mut self, region: &Arc<DataRegion>) -> &mut (Arc<DataRegion>, BTreeSet<DeviceId>) {
        self.validity
            .entry(region.id())
            .or_insert_with(|| (Arc::clone(region), region.valid_devices()))
    }

    fn expand_requirement(&mut self, req: &MemoryRequirement) -> Expansion {
        let region = &req.access.region;
        let mode = req.access.mode;
        let (_, valid) = self.valid_set(region);

        let mut expansion = Expansion::Kept;
        match valid.iter().next().copied() {
            _ if !mode.needs_data() || valid.contains(&req.device) => {
                expansion.set_optimized_away()
            }
            Some(source) => expansion.set_replacement_operation(Operation::memcpy(
                CopyEndpoint::new(region, source),
                CopyEndpoint::new(region, req.device),
            )),
            // Never initialised anywhere: nothing to move.
            None => expansion.set_optimized_away(),
        }

        if mode.writes() {
            *valid = BTreeSet::from([req.device]);
        } else {
            valid.insert(req.device);
        }
        expansion
    }

    fn expand_copy(&mut self, index: usize, id: NodeId, copy: &MemoryCopy) -> Expansion {
        let src = copy.source.region.id();
        let dst = copy.dest.region.id();
        let unchanged_since = |at: usize, buffer: BufferId, last_write: &HashMap<BufferId, usize>| {
            last_write.get(&buffer).is_none_or(|&w| w <= at)
        };

        let earlier = self.copies.iter().rev().find(|(at, _, prior)| {
            prior == copy
                && unchanged_since(*at, src, &self.last_write)
                && unchanged_since(*at, dst, &self.last_write)
        });

        if let Some((_, target, _)) = earlier {
            let mut expansion = Expansion::Kept;
            expansion.set_forward_to_node(*target);
            return expansion;
        }

        if src == dst {
            self.valid_set(&copy.dest.region).1.insert(copy.dest.device);
        } else {
            self.valid_set(&copy.dest.region).1 = BTreeSet::from([copy.dest.device]);
        }
        self.copies.push((index, id, copy.clone()));
        Expansion::Kept
    }
}
