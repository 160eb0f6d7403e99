// src/sched/mod.rs

//! Turning frozen graphs into per-lane submissions.
//!
//! - [`interpreter`] runs the expander pass (optimize away, replace, forward).
//! - [`annotation`] holds the per-node placement and synchronization records.
//! - [`scheduler`] places nodes on lanes and drives the backend executors.

pub mod annotation;
pub mod interpreter;
pub mod scheduler;

pub use annotation::{LanePlacement, NodeSchedulingAnnotation, SyncPrimitive, WaitKind};
pub use interpreter::DagInterpreter;
pub use scheduler::{PlannedDag, ScheduledDag, Scheduler};
