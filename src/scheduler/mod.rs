//! Batch scheduler.
//!
//! Drains the priority queue in batches of up to `batch_size` requests.
//! Requests inside a batch are analyzed concurrently; batches run one after
//! another with a cooperative yield (plus an optional delay) in between. At
//! most one cycle runs at a time.

pub mod queue;

pub use queue::AnalysisQueue;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::SchedulerConfig;
use crate::orchestrator::Orchestrator;

/// Drives queued requests through the orchestrator.
pub struct Scheduler {
    queue: Arc<AnalysisQueue>,
    orchestrator: Arc<Orchestrator>,
    config: SchedulerConfig,
    running: AtomicBool,
    wake: Notify,
}

impl Scheduler {
    pub fn new(queue: Arc<AnalysisQueue>, orchestrator: Arc<Orchestrator>, config: SchedulerConfig) -> Self {
        Self {
            queue,
            orchestrator,
            config,
            running: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    /// Whether a cycle is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the worker to start a cycle.
    pub fn notify(&self) {
        self.wake.notify_one();
    }

    /// Drain the queue until it is empty. Returns the number of requests
    /// processed, or 0 when another cycle already holds the guard.
    pub async fn run_cycle(&self) -> usize {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Scheduling cycle already in progress");
            return 0;
        }

        let batch_size = self.config.batch_size.max(1);
        let mut processed = 0;
        loop {
            let batch = self.queue.pop_batch(batch_size);
            if batch.is_empty() {
                break;
            }
            processed += batch.len();
            debug!(batch = batch.len(), remaining = self.queue.len(), "Dispatching batch");

            let handles: Vec<_> = batch
                .into_iter()
                .map(|request| {
                    let orchestrator = Arc::clone(&self.orchestrator);
                    tokio::spawn(async move { orchestrator.process(request).await })
                })
                .collect();
            for joined in join_all(handles).await {
                if let Err(e) = joined {
                    error!(error = %e, "Analysis task failed");
                }
            }

            tokio::task::yield_now().await;
            if self.config.batch_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.batch_delay_ms)).await;
            }
        }

        self.running.store(false, Ordering::Release);

        // A submission may have landed between the last pop and releasing
        // the guard; its wake-up was swallowed by the guard.
        if !self.queue.is_empty() {
            self.wake.notify_one();
        }
        processed
    }

    /// Run cycles whenever [`Scheduler::notify`] is called.
    pub fn spawn_worker(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                self.wake.notified().await;
                let processed = self.run_cycle().await;
                if processed > 0 {
                    debug!(processed, "Scheduling cycle finished");
                }
            }
        })
    }
}
