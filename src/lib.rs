// src/lib.rs

//! Asynchronous task-graph scheduling and multi-device command dispatch.
//!
//! Operations are appended to a dependency graph through a [`DagManager`].
//! Once enough work has accumulated (or on an explicit flush) the graph is
//! frozen, expanded, placed on per-device lanes and handed to native
//! in-order queues with only the synchronization real dependencies need.

pub mod config;
pub mod dag;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod runtime;
pub mod sched;
pub mod types;

pub use config::LanedagConfig;
pub use dag::{AccessMode, DagBuilder, DataRegion, ExecutionHints, Operation};
pub use errors::{LanedagError, Result};
pub use exec::{BackendExecutor, InorderQueue, MultiQueueExecutor, QueueFactory};
pub use runtime::{DagBuildGuard, DagManager, ManagerStats};
pub use sched::Scheduler;
pub use types::{BackendId, BufferId, DeviceId, LanePolicy, NodeId};
