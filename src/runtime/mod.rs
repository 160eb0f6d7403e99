// src/runtime/mod.rs

//! Background flushing and completion tracking.
//!
//! - [`worker`] runs flush jobs on a dedicated thread, one at a time.
//! - [`submitted`] tracks nodes that may still be running on a device.
//! - [`manager`] ties the builder, scheduler, tracker and worker together.

pub mod manager;
pub mod submitted;
pub mod worker;

pub use manager::{DagBuildGuard, DagManager, ManagerStats};
pub use submitted::SubmittedOps;
pub use worker::FlushWorker;
