// src/dag/mod.rs

//! Dependency graph representation and construction.
//!
//! - [`operation`] is the closed set of things a node can do.
//! - [`hints`] holds typed per-node annotations.
//! - [`node`] is a single graph node and its submission status.
//! - [`data_region`] tracks buffer users and data validity.
//! - [`graph`] is the frozen graph plus its dense enumerator.
//! - [`builder`] accumulates nodes into the in-progress graph.

pub mod builder;
pub mod data_region;
pub mod graph;
pub mod hints;
pub mod node;
pub mod operation;

pub use builder::DagBuilder;
pub use data_region::{DataRegion, DataUser};
pub use graph::{Dag, DagEnumerator};
pub use hints::{ExecutionHint, ExecutionHints, Expansion, HintType};
pub use node::{DagNode, DagNodePtr, NodeStatus};
pub use operation::{
    AccessMode, BufferAccess, CopyEndpoint, KernelLaunch, LaneClass, MemoryCopy,
    MemoryRequirement, Operation,
};
