// src/exec/mod.rs

//! Dispatch layer between scheduled graphs and native device queues.
//!
//! - [`queue`] defines the native in-order queue and event abstraction and
//!   the factory the executors create queues through.
//! - [`backend`] provides the `BackendExecutor` trait the scheduler drives,
//!   plus the submission view and report types.
//! - [`multi_queue`] is the executor for backends with several in-order
//!   queues per device.

pub mod backend;
pub mod multi_queue;
pub mod queue;

pub use backend::{BackendExecutor, DagSubmission, SubmissionReport};
pub use multi_queue::MultiQueueExecutor;
pub use queue::{DeviceEvent, InorderQueue, QueueEvent, QueueFactory};
