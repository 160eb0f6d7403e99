// src/dag/operation.rs

//! The closed set of operations a graph node can carry.

use std::fmt;
use std::sync::Arc;

use crate::dag::data_region::DataRegion;
use crate::types::{BufferId, DeviceId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    Read,
    Write,
    ReadWrite,
    /// Write without caring about the previous contents.
    DiscardWrite,
}

impl AccessMode {
    pub fn writes(self) -> bool {
        !matches!(self, AccessMode::Read)
    }

    /// Whether the previous contents must be present before the access.
    pub fn needs_data(self) -> bool {
        !matches!(self, AccessMode::DiscardWrite)
    }

    /// Two accesses to the same region conflict if either of them writes.
    pub fn conflicts_with(self, other: AccessMode) -> bool {
        self.writes() || other.writes()
    }
}

/// A region plus the way an operation touches it.
#[derive(Clone)]
pub struct BufferAccess {
    pub region: Arc<DataRegion>,
    pub mode: AccessMode,
}

impl BufferAccess {
    pub fn new(region: &Arc<DataRegion>, mode: AccessMode) -> Self {
        Self {
            region: Arc::clone(region),
            mode,
        }
    }

    pub fn buffer(&self) -> BufferId {
        self.region.id()
    }
}

impl fmt::Debug for BufferAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferAccess")
            .field("buffer", &self.region.id())
            .field("mode", &self.mode)
            .finish()
    }
}

// Regions are compared by identity; their mutable bookkeeping is irrelevant.
impl PartialEq for BufferAccess {
    fn eq(&self, other: &Self) -> bool {
        self.region.id() == other.region.id() && self.mode == other.mode
    }
}

impl Eq for BufferAccess {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLaunch {
    pub name: String,
    pub accesses: Vec<BufferAccess>,
    pub global_size: [usize; 3],
}

/// One side of a copy: which region, held on which device.
#[derive(Clone)]
pub struct CopyEndpoint {
    pub region: Arc<DataRegion>,
    pub device: DeviceId,
}

impl CopyEndpoint {
    pub fn new(region: &Arc<DataRegion>, device: DeviceId) -> Self {
        Self {
            region: Arc::clone(region),
            device,
        }
    }
}

impl fmt::Debug for CopyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}@{}", self.region.id().0, self.device)
    }
}

impl PartialEq for CopyEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.region.id() == other.region.id() && self.device == other.device
    }
}

impl Eq for CopyEndpoint {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCopy {
    pub source: CopyEndpoint,
    pub dest: CopyEndpoint,
    pub bytes: usize,
}

impl MemoryCopy {
    /// The device whose queue performs the copy: the destination, unless
    /// that is the host, in which case the source device pushes the data.
    pub fn executing_device(&self) -> DeviceId {
        if self.dest.device.is_host() {
            self.source.device
        } else {
            self.dest.device
        }
    }
}

/// "Make this region available on `device` for `access.mode`."
///
/// Requirements are never executed directly: the expander turns each one
/// into a copy or drops it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRequirement {
    pub access: BufferAccess,
    pub device: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Kernel(KernelLaunch),
    Memcpy(MemoryCopy),
    Requirement(MemoryRequirement),
    /// Orders after all predecessors; carries no data.
    Barrier,
}

impl Operation {
    pub fn kernel(name: impl Into<String>, accesses: Vec<BufferAccess>) -> Self {
        Operation::Kernel(KernelLaunch {
            name: name.into(),
            accesses,
            global_size: [1, 1, 1],
        })
    }

    pub fn memcpy(source: CopyEndpoint, dest: CopyEndpoint) -> Self {
        let bytes = source.region.size().min(dest.region.size());
        Operation::Memcpy(MemoryCopy {
            source,
            dest,
            bytes,
        })
    }

    pub fn require(region: &Arc<DataRegion>, mode: AccessMode, device: DeviceId) -> Self {
        Operation::Requirement(MemoryRequirement {
            access: BufferAccess::new(region, mode),
            device,
        })
    }

    /// Every region the operation touches, with the access mode used.
    pub fn accesses(&self) -> Vec<BufferAccess> {
        match self {
            Operation::Kernel(k) => k.accesses.clone(),
            Operation::Memcpy(c) => {
                if Arc::ptr_eq(&c.source.region, &c.dest.region) {
                    // Moving a region between devices: readers and writers
                    // of the region are ordered against the move.
                    vec![BufferAccess::new(&c.source.region, AccessMode::ReadWrite)]
                } else {
                    vec![
                        BufferAccess::new(&c.source.region, AccessMode::Read),
                        BufferAccess::new(&c.dest.region, AccessMode::DiscardWrite),
                    ]
                }
            }
            Operation::Requirement(r) => vec![r.access.clone()],
            Operation::Barrier => Vec::new(),
        }
    }

    pub fn writes_to(&self, buffer: BufferId) -> bool {
        self.accesses()
            .iter()
            .any(|a| a.buffer() == buffer && a.mode.writes())
    }

    pub fn is_memory_requirement(&self) -> bool {
        matches!(self, Operation::Requirement(_))
    }

    /// Device implied by the operation itself, if any.
    pub fn implied_device(&self) -> Option<DeviceId> {
        match self {
            Operation::Requirement(r) => Some(r.device),
            Operation::Memcpy(c) => Some(c.executing_device()),
            Operation::Kernel(_) | Operation::Barrier => None,
        }
    }

    /// Copies run on memcpy lanes, everything else on kernel lanes.
    pub fn lane_class(&self) -> LaneClass {
        match self {
            Operation::Memcpy(_) | Operation::Requirement(_) => LaneClass::Memcpy,
            Operation::Kernel(_) | Operation::Barrier => LaneClass::Kernel,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Operation::Kernel(_) => "kernel",
            Operation::Memcpy(_) => "memcpy",
            Operation::Requirement(_) => "requirement",
            Operation::Barrier => "barrier",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LaneClass {
    Memcpy,
    Kernel,
}
