//! Background upload scheduler
//!
//! Every `interval` (or on [`SchedulerHandle::tick_now`]) one pass picks up
//! the pending records and drives them through
//! [`UploadPipeline::upload_chunk`], at most `concurrency` at a time.

use std::sync::Arc;
use std::time::Duration;

use pstore_core::config::UploadConfig;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::upload::{UploadOutcome, UploadPipeline};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub interval: Duration,
    pub concurrency: usize,
    pub max_retries: u32,
}

impl SchedulerOptions {
    pub fn from_config(config: &UploadConfig) -> Self {
        SchedulerOptions {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions::from_config(&UploadConfig::default())
    }
}

pub struct UploadScheduler;

impl UploadScheduler {
    /// Start the scheduler loop on the current runtime.
    pub fn spawn(pipeline: Arc<UploadPipeline>, options: SchedulerOptions) -> SchedulerHandle {
        let cancel = CancellationToken::new();
        let wake = Arc::new(Notify::new());
        let task = tokio::spawn(run(pipeline, options, cancel.clone(), wake.clone()));
        SchedulerHandle { cancel, wake, task }
    }
}

pub struct SchedulerHandle {
    cancel: CancellationToken,
    wake: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Run a pass now instead of waiting for the next tick.
    pub fn tick_now(&self) {
        self.wake.notify_one();
    }

    /// Stop scheduling and wait for in-flight uploads to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "upload scheduler task ended abnormally");
        }
    }
}

async fn run(
    pipeline: Arc<UploadPipeline>,
    options: SchedulerOptions,
    cancel: CancellationToken,
    wake: Arc<Notify>,
) {
    info!(
        interval = ?options.interval,
        concurrency = options.concurrency,
        max_retries = options.max_retries,
        "upload scheduler started"
    );

    let semaphore = Arc::new(Semaphore::new(options.concurrency));
    let mut in_flight = JoinSet::new();
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }

        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                warn!(error = %e, "upload task panicked");
            }
        }

        run_pass(&pipeline, &options, &semaphore, &mut in_flight, &cancel).await;
    }

    let draining = in_flight.len();
    if draining > 0 {
        info!(uploads = draining, "waiting for in-flight uploads");
    }
    while in_flight.join_next().await.is_some() {}
    info!("upload scheduler stopped");
}

async fn run_pass(
    pipeline: &Arc<UploadPipeline>,
    options: &SchedulerOptions,
    semaphore: &Arc<Semaphore>,
    in_flight: &mut JoinSet<()>,
    cancel: &CancellationToken,
) {
    let pending = match pipeline.pending(options.max_retries) {
        Ok(pending) => pending,
        Err(e) => {
            warn!(error = %e, "could not list pending uploads");
            return;
        }
    };
    if pending.is_empty() {
        return;
    }
    debug!(count = pending.len(), "scheduling uploads");

    for record in pending {
        let permit = tokio::select! {
            _ = cancel.cancelled() => return,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let pipeline = pipeline.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            let id = record.id;
            match pipeline.upload_chunk(&id).await {
                Ok(UploadOutcome::Published(_)) => {}
                Ok(outcome) => debug!(id = %id, ?outcome, "upload skipped"),
                // Already logged and recorded Failed by the pipeline.
                Err(e) => debug!(id = %id, error = %e, "scheduled upload failed"),
            }
        });
    }
}
