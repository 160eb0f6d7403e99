// src/runtime/manager.rs

//! Front door of the crate: owns the live builder, the scheduler, the
//! completion tracker and the flush worker.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::config::LanedagConfig;
use crate::dag::builder::DagBuilder;
use crate::dag::data_region::DataRegion;
use crate::dag::graph::Dag;
use crate::errors::{LanedagError, Result};
use crate::sched::interpreter::DagInterpreter;
use crate::sched::scheduler::Scheduler;
use crate::types::BufferId;

use super::submitted::SubmittedOps;
use super::worker::FlushWorker;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Running totals, updated by the flush worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Flush jobs that froze a non-empty graph.
    pub flushes: usize,
    pub nodes_submitted: usize,
    pub nodes_optimized_away: usize,
    pub nodes_forwarded: usize,
    pub failures: usize,
}

/// State shared between the manager handle and its flush jobs.
struct Shared {
    builder: Mutex<DagBuilder>,
    scheduler: Scheduler,
    submitted: SubmittedOps,
    stats: Mutex<ManagerStats>,
    errors: Mutex<Vec<LanedagError>>,
}

impl Shared {
    fn flush(&self) {
        let dag = {
            let mut builder = lock(&self.builder);
            if builder.current_size() == 0 {
                debug!("flush requested with an empty builder; nothing to do");
                return;
            }
            builder.finish_and_reset()
        };

        let regions = touched_regions(&dag);
        let released = self.release_dead_users(&regions);

        let scheduled = self.scheduler.submit(dag, &self.submitted);
        self.register_submitted_ops(&scheduled.interpreter);

        let released = released + self.release_dead_users(&regions);
        let report = scheduled.report;

        {
            let mut stats = lock(&self.stats);
            stats.flushes += 1;
            stats.nodes_submitted += report.submitted;
            stats.nodes_optimized_away += report.skipped;
            stats.nodes_forwarded += report.forwarded;
            stats.failures += report.failures.len();
        }

        info!(
            nodes = scheduled.interpreter.len(),
            released_users = released,
            failures = report.failures.len(),
            "flush complete"
        );

        if !report.failures.is_empty() {
            warn!(failures = report.failures.len(), "flush recorded submission failures");
            lock(&self.errors).extend(report.failures);
        }
    }

    fn register_submitted_ops(&self, interpreter: &DagInterpreter) {
        self.submitted.update_with_submission(interpreter.nodes());
    }

    fn release_dead_users(&self, regions: &BTreeMap<BufferId, Arc<DataRegion>>) -> usize {
        regions
            .values()
            .map(|region| region.release_dead_users(|id| self.submitted.is_dead(id)))
            .sum()
    }
}

fn touched_regions(dag: &Dag) -> BTreeMap<BufferId, Arc<DataRegion>> {
    dag.nodes()
        .iter()
        .flat_map(|n| n.operation().accesses())
        .map(|a| (a.buffer(), a.region))
        .collect()
}

/// Accumulates operations and flushes them to the executors in the
/// background.
///
/// Dropping the manager waits for every submitted operation to complete
/// and then stops the worker.
pub struct DagManager {
    shared: Arc<Shared>,
    worker: FlushWorker,
    max_cached_nodes: usize,
}

impl std::fmt::Debug for DagManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DagManager")
            .field("scheduler", &self.shared.scheduler)
            .field("max_cached_nodes", &self.max_cached_nodes)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl DagManager {
    pub fn new(scheduler: Scheduler, config: &LanedagConfig) -> Result<Self> {
        let worker = FlushWorker::start()?;
        info!(
            max_cached_nodes = config.scheduler.max_cached_nodes,
            lane_policy = ?config.scheduler.lane_policy,
            profiling = config.scheduler.profiling,
            "DAG manager started"
        );
        Ok(Self {
            shared: Arc::new(Shared {
                builder: Mutex::new(DagBuilder::default()),
                scheduler,
                submitted: SubmittedOps::new(),
                stats: Mutex::new(ManagerStats::default()),
                errors: Mutex::new(Vec::new()),
            }),
            worker,
            max_cached_nodes: config.scheduler.max_cached_nodes,
        })
    }

    /// Locked access to the live builder. Does not trigger a flush; prefer
    /// [`build`](Self::build) for appending.
    pub fn builder(&self) -> MutexGuard<'_, DagBuilder> {
        lock(&self.shared.builder)
    }

    /// Scoped access to the builder that checks the flush threshold when it
    /// goes out of scope.
    pub fn build(&self) -> DagBuildGuard<'_> {
        DagBuildGuard {
            manager: self,
            builder: Some(self.builder()),
        }
    }

    /// Nodes appended but not yet frozen by a flush.
    pub fn pending_nodes(&self) -> usize {
        self.builder().current_size()
    }

    /// Queue a flush of the current graph and return immediately.
    pub fn flush_async(&self) -> Result<()> {
        let shared = Arc::clone(&self.shared);
        self.worker.submit(move || shared.flush())
    }

    /// Flush and block until the worker has processed it.
    ///
    /// Returns the first submission failure recorded since the last call,
    /// if any; the others are logged and discarded. Must not be called from
    /// inside an async context.
    pub fn flush_sync(&self) -> Result<()> {
        self.flush_async()?;
        self.worker.drain()?;
        let mut errors = std::mem::take(&mut *lock(&self.shared.errors)).into_iter();
        let Some(first) = errors.next() else {
            return Ok(());
        };
        for other in errors {
            warn!(error = %other, "additional submission failure");
        }
        Err(first)
    }

    /// Block until everything submitted so far has completed on its device.
    ///
    /// Nodes still sitting in the builder are not flushed by this call.
    pub fn wait(&self) -> Result<()> {
        self.worker.drain()?;
        self.shared.submitted.wait_for_all();
        Ok(())
    }

    /// Record every node of a submitted graph in the completion tracker.
    pub fn register_submitted_ops(&self, interpreter: &DagInterpreter) {
        self.shared.register_submitted_ops(interpreter);
    }

    /// Flush in the background if the builder holds more than
    /// `max_cached_nodes` nodes.
    pub fn trigger_flush_opportunity(&self) -> Result<()> {
        let pending = self.pending_nodes();
        if pending > self.max_cached_nodes {
            debug!(pending, threshold = self.max_cached_nodes, "flush threshold exceeded");
            self.flush_async()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> ManagerStats {
        *lock(&self.shared.stats)
    }

    pub fn submitted_ops(&self) -> &SubmittedOps {
        &self.shared.submitted
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }
}

impl Drop for DagManager {
    fn drop(&mut self) {
        if let Err(e) = self.wait() {
            warn!(error = %e, "could not wait for outstanding operations at shutdown");
        }
    }
}

/// Builder access from [`DagManager::build`]. Releases the builder and runs
/// [`DagManager::trigger_flush_opportunity`] when dropped.
pub struct DagBuildGuard<'a> {
    manager: &'a DagManager,
    builder: Option<MutexGuard<'a, DagBuilder>>,
}

impl Deref for DagBuildGuard<'_> {
    type Target = DagBuilder;

    fn deref(&self) -> &DagBuilder {
        match &self.builder {
            Some(builder) => &**builder,
            None => unreachable!("builder guard used after release"),
        }
    }
}

impl DerefMut for DagBuildGuard<'_> {
    fn deref_mut(&mut self) -> &mut DagBuilder {
        match &mut self.builder {
            Some(builder) => &mut **builder,
            None => unreachable!("builder guard used after release"),
        }
    }
}

impl Drop for DagBuildGuard<'_> {
    fn drop(&mut self) {
        // The lock must be gone before the threshold check takes it again.
        self.builder.take();
        if let Err(e) = self.manager.trigger_flush_opportunity() {
            warn!(error = %e, "could not queue automatic flush");
        }
    }
}
