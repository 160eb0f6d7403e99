#![allow(dead_code)]

use std::sync::Arc;

use lanedag::config::{LaneSection, LanedagConfig, SchedulerSection};
use lanedag::dag::DataRegion;
use lanedag::exec::{BackendExecutor, MultiQueueExecutor};
use lanedag::runtime::DagManager;
use lanedag::sched::Scheduler;
use lanedag::types::{BackendId, BufferId, DeviceId, LanePolicy};

use crate::fake_queue::DeviceLog;

pub const GPU: BackendId = BackendId(1);
pub const OTHER: BackendId = BackendId(2);

pub fn gpu(index: u32) -> DeviceId {
    DeviceId::new(GPU, index)
}

pub fn other(index: u32) -> DeviceId {
    DeviceId::new(OTHER, index)
}

pub fn host() -> DeviceId {
    DeviceId::host()
}

/// A 1 KiB region whose contents start on the host.
pub fn region(id: u64) -> Arc<DataRegion> {
    DataRegion::new(BufferId(id), 1024, DeviceId::host())
}

pub fn region_on(id: u64, device: DeviceId) -> Arc<DataRegion> {
    DataRegion::new(BufferId(id), 1024, device)
}

/// Builder for `LanedagConfig` plus the executors wired to a fake device log.
pub struct RuntimeBuilder {
    scheduler: SchedulerSection,
    lanes: LaneSection,
    backends: Vec<(BackendId, u32)>,
    log: Arc<DeviceLog>,
}

impl RuntimeBuilder {
    /// One GPU backend with two devices, default lanes and policy.
    pub fn new() -> Self {
        Self {
            scheduler: SchedulerSection::default(),
            lanes: LaneSection::default(),
            backends: vec![(GPU, 2)],
            log: DeviceLog::new(),
        }
    }

    pub fn with_backend(mut self, backend: BackendId, devices: u32) -> Self {
        self.backends.push((backend, devices));
        self
    }

    pub fn with_lanes(mut self, memcpy: usize, kernel: usize) -> Self {
        self.lanes = LaneSection { memcpy, kernel };
        self
    }

    pub fn with_policy(mut self, policy: LanePolicy) -> Self {
        self.scheduler.lane_policy = policy;
        self
    }

    pub fn with_profiling(mut self) -> Self {
        self.scheduler.profiling = true;
        self
    }

    pub fn with_max_cached_nodes(mut self, n: usize) -> Self {
        self.scheduler.max_cached_nodes = n;
        self
    }

    pub fn with_log(mut self, log: Arc<DeviceLog>) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> Arc<DeviceLog> {
        Arc::clone(&self.log)
    }

    pub fn config(&self) -> LanedagConfig {
        LanedagConfig {
            scheduler: self.scheduler.clone(),
            lanes: self.lanes,
        }
    }

    pub fn executors(&self) -> Vec<Arc<dyn BackendExecutor>> {
        self.backends
            .iter()
            .map(|&(backend, count)| {
                let devices = (0..count).map(|i| DeviceId::new(backend, i)).collect();
                Arc::new(MultiQueueExecutor::new(
                    backend,
                    devices,
                    self.lanes,
                    self.log.factory(),
                )) as Arc<dyn BackendExecutor>
            })
            .collect()
    }

    pub fn build_scheduler(&self) -> Scheduler {
        Scheduler::new(self.executors(), &self.scheduler)
    }

    pub fn build_manager(&self) -> DagManager {
        DagManager::new(self.build_scheduler(), &self.config())
            .expect("failed to start DAG manager")
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
