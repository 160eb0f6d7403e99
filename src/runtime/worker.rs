// src/runtime/worker.rs

//! The single background worker that runs flush jobs.
//!
//! Jobs run one at a time in FIFO order on a dedicated thread driving a
//! current-thread tokio runtime, so two flushes never overlap.

use std::fmt;
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::errors::{LanedagError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum WorkItem {
    Run(Job),
    Drain(oneshot::Sender<()>),
}

pub struct FlushWorker {
    tx: Option<mpsc::UnboundedSender<WorkItem>>,
    thread: Option<JoinHandle<()>>,
}

impl fmt::Debug for FlushWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushWorker")
            .field("running", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

impl FlushWorker {
    pub fn start() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkItem>();

        let thread = std::thread::Builder::new()
            .name("lanedag-worker".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    info!("flush worker started");
                    while let Some(item) = rx.recv().await {
                        match item {
                            WorkItem::Run(job) => job(),
                            WorkItem::Drain(done) => {
                                let _ = done.send(());
                            }
                        }
                    }
                    info!("flush worker queue closed; exiting");
                });
            })?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Queue `job` behind everything already submitted.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<()> {
        self.send(WorkItem::Run(Box::new(job)))
    }

    /// Block until every job queued before this call has run.
    ///
    /// Must not be called from inside an async context.
    pub fn drain(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send(WorkItem::Drain(done_tx))?;
        done_rx
            .blocking_recv()
            .map_err(|_| LanedagError::WorkerUnavailable)
    }

    fn send(&self, item: WorkItem) -> Result<()> {
        self.tx
            .as_ref()
            .ok_or(LanedagError::WorkerUnavailable)?
            .send(item)
            .map_err(|_| LanedagError::WorkerUnavailable)
    }
}

impl Drop for FlushWorker {
    fn drop(&mut self) {
        if let Err(e) = self.drain() {
            debug!(error = %e, "flush worker already gone at shutdown");
        }
        // Closing the channel ends the worker loop.
        self.tx.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("flush worker panicked");
        }
    }
}
