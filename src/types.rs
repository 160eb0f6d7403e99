// src/types.rs

//! Small identity and policy types shared across the crate.

use std::fmt;

use serde::Deserialize;

/// Identifies a backend (a device family with its own native queue runtime).
///
/// `BackendId::HOST` is reserved for host memory; it never owns an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct BackendId(pub u32);

impl BackendId {
    pub const HOST: BackendId = BackendId(0);
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend#{}", self.0)
    }
}

/// A physical device: a backend plus the device index inside that backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct DeviceId {
    pub backend: BackendId,
    pub index: u32,
}

impl DeviceId {
    pub const fn new(backend: BackendId, index: u32) -> Self {
        Self { backend, index }
    }

    pub const fn host() -> Self {
        Self::new(BackendId::HOST, 0)
    }

    pub fn is_host(&self) -> bool {
        self.backend == BackendId::HOST
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device {}:{}", self.backend.0, self.index)
    }
}

/// Stable node identity. Allocated in append order, so comparing two ids
/// compares their submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

/// How a lane is picked inside the range an executor offers, when no
/// predecessor on the same device and lane class suggests one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LanePolicy {
    /// Cycle through the range, starting at its first lane on every submit.
    #[default]
    RoundRobin,
    /// Pick the lane with the fewest nodes assigned in this submit
    /// (lowest index wins ties).
    LeastLoaded,
}

/// Submission model of a backend executor. The scheduler uses it to decide
/// whether same-lane ordering comes for free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    /// Operations are serialized onto in-order queues (e.g. streams).
    InorderQueue,
    /// Independent out-of-order queues; every edge needs an explicit wait.
    OutOfOrderQueue,
    /// The backend consumes whole task graphs natively.
    TaskGraph,
}
