// src/dag/builder.rs

//! Incremental construction of the in-progress graph.
//!
//! The builder is single-writer: the manager wraps it in a mutex so that
//! the flush worker can freeze it, but appends are expected to come from
//! one logical thread.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::dag::data_region::DataUser;
use crate::dag::graph::Dag;
use crate::dag::hints::ExecutionHints;
use crate::dag::node::{DagNode, DagNodePtr};
use crate::dag::operation::Operation;
use crate::types::NodeId;

#[derive(Debug)]
pub struct DagBuilder {
    default_hints: ExecutionHints,
    current: Vec<DagNodePtr>,
    next_id: u64,
}

impl DagBuilder {
    /// Create a builder whose nodes start from `default_hints`.
    pub fn new(default_hints: ExecutionHints) -> Self {
        Self {
            default_hints,
            current: Vec::new(),
            next_id: 0,
        }
    }

    /// Append a node for `operation` and return it.
    ///
    /// Predecessors are derived from the live users of every region the
    /// operation touches (any pair where one side writes), plus the last
    /// memory requirement of each region, plus an `ExplicitRequire` hint if
    /// present. Ordering every access after the region's last requirement
    /// keeps readers behind the copy that brings their data in.
    ///
    /// # Panics
    ///
    /// If an `ExplicitRequire` hint names a node that has not been built yet.
    pub fn append(&mut self, operation: Operation, hints: ExecutionHints) -> DagNodePtr {
        let id = NodeId(self.next_id);
        self.next_id += 1;

        let mut node_hints = self.default_hints.clone();
        node_hints.overwrite_with(&hints);

        let accesses = operation.accesses();
        let is_requirement = operation.is_memory_requirement();

        let mut requirements: BTreeSet<NodeId> = BTreeSet::new();
        for access in &accesses {
            requirements.extend(access.region.conflicting_users(access.mode));
            requirements.extend(access.region.last_requirement());
        }

        if let Some(explicit) = node_hints.explicit_requirement() {
            assert!(
                explicit < id,
                "explicit requirement {explicit} of {id} does not exist yet"
            );
            requirements.insert(explicit);
        }

        for access in &accesses {
            access.region.add_user(DataUser {
                node: id,
                mode: access.mode,
                is_requirement,
            });
        }

        let requirements: Vec<NodeId> = requirements.into_iter().collect();
        debug!(
            node = %id,
            kind = operation.kind_name(),
            requirements = ?requirements,
            "appended node to current DAG"
        );

        let node = Arc::new(DagNode::new(id, operation, requirements, node_hints));
        self.current.push(Arc::clone(&node));
        node
    }

    /// Number of nodes accumulated since the last reset.
    pub fn current_size(&self) -> usize {
        self.current.len()
    }

    /// Freeze the accumulated nodes into a [`Dag`] and start a new, empty
    /// graph with a fresh copy of the default hints.
    pub fn finish_and_reset(&mut self) -> Dag {
        let nodes = std::mem::take(&mut self.current);
        let dag = Dag::from_nodes(nodes);
        debug!(nodes = dag.len(), "finished DAG; builder reset");
        dag
    }

    pub fn default_hints(&self) -> &ExecutionHints {
        &self.default_hints
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new(ExecutionHints::new())
    }
}
