// src/exec/queue.rs

//! Native queue abstraction.
//!
//! A backend provides in-order queues (one per lane) through a
//! [`QueueFactory`]. Everything the executor needs from a device runtime is
//! expressed through [`InorderQueue`] and [`DeviceEvent`], so tests can plug
//! in a recording fake instead of a real device.

use std::fmt;
use std::sync::Arc;

use crate::dag::operation::Operation;
use crate::errors::Result;
use crate::types::DeviceId;

/// A point in a queue's timeline that can be polled or waited on.
pub trait DeviceEvent: Send + Sync + fmt::Debug {
    /// Whether all work before the event has finished.
    fn is_complete(&self) -> bool;

    /// Block the calling thread until the event completes.
    fn wait(&self);
}

pub type QueueEvent = Arc<dyn DeviceEvent>;

/// A native queue that runs operations strictly in submission order.
pub trait InorderQueue: Send + Sync {
    fn device(&self) -> DeviceId;

    /// Enqueue an operation. Requirements never reach this point.
    fn submit(&self, operation: &Operation) -> Result<()>;

    /// Record an event after everything submitted so far.
    fn insert_event(&self) -> Result<QueueEvent>;

    /// Make later submissions wait for an event of the same backend.
    fn wait_event(&self, event: &QueueEvent) -> Result<()>;

    /// Make later submissions wait for an event exported by another backend.
    fn wait_external_event(&self, event: &QueueEvent) -> Result<()>;

    fn is_idle(&self) -> bool;
}

/// Creates the queue for one lane of `device`. Called lazily, at most once
/// per (device, lane) for the lifetime of an executor.
pub type QueueFactory = Arc<dyn Fn(DeviceId) -> Result<Box<dyn InorderQueue>> + Send + Sync>;
