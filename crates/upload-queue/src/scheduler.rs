//! Periodic flushing of every registered queue.

use crate::{QueueError, QueueRegistry, QueueResult, SendOutcome};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Flush period used when `start` is called without one.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

/// Counts from one pass over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Queues visited.
    pub attempted: usize,
    /// Queues that dispatched a batch and handled the acknowledgement.
    pub delivered: usize,
    /// Queues with nothing to send.
    pub idle: usize,
    /// Queues whose send returned an error.
    pub failed: usize,
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Timer that sends every registered queue in turn.
///
/// Queues are visited sequentially in registry order; a failing queue is
/// logged and does not prevent the others from being flushed. Ticks that
/// come due while a pass is still running are delayed, never stacked.
pub struct UploadScheduler {
    registry: Arc<QueueRegistry>,
    worker: Mutex<Option<Worker>>,
}

impl UploadScheduler {
    pub fn new(registry: Arc<QueueRegistry>) -> Self {
        Self {
            registry,
            worker: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    /// Start flushing every `period` ([`DEFAULT_FLUSH_INTERVAL`] when `None`).
    ///
    /// The first pass runs one period after the call. Returns `false` when
    /// the scheduler was already running, in which case nothing changes.
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, period: Option<Duration>) -> QueueResult<bool> {
        let period = period.unwrap_or(DEFAULT_FLUSH_INTERVAL);
        if period.is_zero() {
            return Err(QueueError::Configuration(
                "flush interval must be greater than zero".to_string(),
            ));
        }

        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Upload scheduler already running");
            return Ok(false);
        }

        let (shutdown, mut shutdown_rx) = oneshot::channel();
        let registry = self.registry.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        let report = flush_registry(&registry).await;
                        debug!(
                            attempted = report.attempted,
                            delivered = report.delivered,
                            failed = report.failed,
                            "Scheduled flush finished"
                        );
                    }
                }
            }

            debug!("Upload scheduler loop exited");
        });

        *worker = Some(Worker { shutdown, handle });
        info!(interval_ms = period.as_millis() as u64, "Upload scheduler started");
        Ok(true)
    }

    /// Stop scheduling further passes.
    ///
    /// A pass already in progress runs to completion in the background.
    /// Returns `false` when the scheduler was not running.
    pub fn stop(&self) -> bool {
        match self.worker.lock().take() {
            Some(worker) => {
                let _ = worker.shutdown.send(());
                info!("Upload scheduler stopped");
                true
            }
            None => false,
        }
    }

    /// Stop and wait for an in-progress pass to finish.
    pub async fn stop_and_wait(&self) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return false;
        };

        let _ = worker.shutdown.send(());
        if let Err(e) = worker.handle.await {
            error!(error = %e, "Upload scheduler task failed");
        }
        info!("Upload scheduler stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Run one pass immediately, independent of the timer.
    pub async fn flush_all(&self) -> FlushReport {
        flush_registry(&self.registry).await
    }
}

impl Drop for UploadScheduler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.shutdown.send(());
        }
    }
}

async fn flush_registry(registry: &QueueRegistry) -> FlushReport {
    let mut report = FlushReport::default();

    for (id, queue) in registry.snapshot().await {
        report.attempted += 1;
        match queue.send().await {
            Ok(SendOutcome::Idle) => report.idle += 1,
            Ok(SendOutcome::Delivered { records, .. }) => {
                debug!(queue = %id, records, "Queue flushed");
                report.delivered += 1;
            }
            Err(e) => {
                warn!(queue = %id, error = %e, "Queue flush failed");
                report.failed += 1;
            }
        }
    }

    report
}
