// src/dag/graph.rs

use std::collections::HashMap;
use std::fmt::Write as _;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::node::DagNodePtr;
use crate::types::NodeId;

/// A frozen dependency graph.
///
/// Nodes are kept in append order, which is also a valid topological order
/// because a node can only depend on nodes built before it. Edges may point
/// at nodes of earlier graphs; those are resolved through the completion
/// tracker at scheduling time.
#[derive(Debug, Clone, Default)]
pub struct Dag {
    nodes: Vec<DagNodePtr>,
    memory_requirements: Vec<DagNodePtr>,
}

impl Dag {
    pub(crate) fn from_nodes(nodes: Vec<DagNodePtr>) -> Self {
        let memory_requirements = nodes
            .iter()
            .filter(|n| n.operation().is_memory_requirement())
            .cloned()
            .collect();
        Self {
            nodes,
            memory_requirements,
        }
    }

    pub fn nodes(&self) -> &[DagNodePtr] {
        &self.nodes
    }

    /// Nodes whose operation is a memory requirement, in append order.
    pub fn memory_requirements(&self) -> &[DagNodePtr] {
        &self.memory_requirements
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.iter().any(|n| n.id() == id)
    }

    /// In-graph dependency edges as a petgraph map (edge: requirement -> node).
    pub fn dependency_graph(&self) -> DiGraphMap<NodeId, ()> {
        let mut graph = DiGraphMap::new();
        for node in &self.nodes {
            graph.add_node(node.id());
        }
        for node in &self.nodes {
            for &req in node.requirements() {
                if graph.contains_node(req) {
                    graph.add_edge(req, node.id(), ());
                }
            }
        }
        graph
    }

    /// Always true for graphs produced by the builder; kept as a debug check.
    pub fn is_acyclic(&self) -> bool {
        toposort(&self.dependency_graph(), None).is_ok()
    }

    /// Graphviz rendering of the in-graph edges, labelled with the operation kind.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph dag {\n");
        for node in &self.nodes {
            let _ = writeln!(
                out,
                "  n{} [label=\"{} {}\"];",
                node.id().0,
                node.operation().kind_name(),
                node.id().0
            );
        }
        for (from, to, _) in self.dependency_graph().all_edges() {
            let _ = writeln!(out, "  n{} -> n{};", from.0, to.0);
        }
        out.push_str("}\n");
        out
    }
}

/// Dense numbering of the nodes of one graph, used to index per-node tables.
#[derive(Debug, Clone, Default)]
pub struct DagEnumerator {
    index: HashMap<NodeId, usize>,
}

impl DagEnumerator {
    pub fn new(dag: &Dag) -> Self {
        let index = dag
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id(), i))
            .collect();
        Self { index }
    }

    /// Index of `id` inside the enumerated graph, `None` if it belongs elsewhere.
    pub fn index_of(&self, id: NodeId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
