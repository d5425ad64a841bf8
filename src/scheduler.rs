//! Periodic driver that claims export jobs and runs them.
//!
//! One run: take the claim lock, return stale Processing jobs to the queue,
//! claim a bounded batch, release the lock, then export each claimed job.
//! Several scheduler processes may share one store and lock directory; the
//! lock only serializes claiming, never job execution.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ExportConfig;
use crate::error::{ExportError, Result};
use crate::export::SubjectExporter;
use crate::job::{ExportJob, JobStatus, MAX_RETRIES};
use crate::lock::ClaimLock;
use crate::queue::ExportJobQueue;
use crate::telemetry;

/// Most attempts exported by one run.
pub const ATTEMPTS_PER_RUN: usize = 100;

/// Wall-clock budget of one run's JavaScript settling delays.
pub const JS_DELAY_CUTOFF: Duration = Duration::from_secs(60);

/// Jobs to claim per run: `floor(cutoff / delay)` when documents wait for
/// JavaScript, else `ceiling`. Never less than one.
pub fn batch_size(ceiling: usize, cutoff: Duration, delay: Option<Duration>) -> usize {
    let ceiling = ceiling.max(1);
    match delay {
        Some(delay) if !delay.is_zero() => {
            let fitting = (cutoff.as_secs_f64() / delay.as_secs_f64()).floor() as usize;
            fitting.clamp(1, ceiling)
        }
        _ => ceiling,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub autoexport: bool,
    pub batch_size: usize,
    pub max_retries: u32,
    /// Age after which a Processing job is requeued; `None` disables the sweep.
    pub stale_after: Option<Duration>,
}

impl SchedulerSettings {
    pub fn from_config(config: &ExportConfig) -> Self {
        Self {
            autoexport: config.autoexport,
            batch_size: batch_size(ATTEMPTS_PER_RUN, JS_DELAY_CUTOFF, config.javascript_delay()),
            max_retries: MAX_RETRIES,
            stale_after: config.stale_after(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub requeued_stale: usize,
    pub claimed: usize,
    pub processed: usize,
    /// Failed jobs returned to Waiting.
    pub retried: usize,
    /// Failed jobs moved to Error.
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Automatic export is switched off.
    Disabled,
    /// Another instance held the claim lock for every attempt.
    LockUnavailable,
    Completed(RunReport),
}

pub struct ExportScheduler {
    queue: ExportJobQueue,
    lock: ClaimLock,
    exporter: Arc<dyn SubjectExporter>,
    settings: SchedulerSettings,
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

impl ExportScheduler {
    pub fn new(
        queue: ExportJobQueue,
        lock: ClaimLock,
        exporter: Arc<dyn SubjectExporter>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            queue,
            lock,
            exporter,
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Runs one scheduling pass.
    ///
    /// Errors only come from the claim phase; failures of individual jobs
    /// are recorded on the jobs and counted in the report.
    pub async fn run_once(&self) -> Result<RunOutcome> {
        if !self.settings.autoexport {
            debug!("Automatic export disabled, skipping run");
            return Ok(RunOutcome::Disabled);
        }

        let Some(guard) = self.lock.acquire().await else {
            warn!(path = %self.lock.path().display(), "Claim lock unavailable, skipping run");
            return Ok(RunOutcome::LockUnavailable);
        };
        let claimed = self.sweep_and_claim().await;
        guard.release().await;
        let (requeued_stale, jobs) = claimed?;

        let mut report = RunReport {
            requeued_stale,
            claimed: jobs.len(),
            ..RunReport::default()
        };
        for mut job in jobs {
            self.execute(&mut job, &mut report).await;
        }

        info!(
            requeued_stale = report.requeued_stale,
            claimed = report.claimed,
            processed = report.processed,
            retried = report.retried,
            failed = report.failed,
            "Scheduler run finished"
        );
        telemetry::record_scheduler_run(&report);
        Ok(RunOutcome::Completed(report))
    }

    async fn sweep_and_claim(&self) -> Result<(usize, Vec<ExportJob>)> {
        let requeued = match self.settings.stale_after {
            Some(age) => {
                let age = chrono::Duration::from_std(age).map_err(|err| {
                    ExportError::config("STALE_PROCESSING_SECS", err.to_string())
                })?;
                let cutoff = chrono::Utc::now() - age;
                self.queue
                    .requeue_stale(cutoff, self.settings.max_retries)
                    .await?
            }
            None => 0,
        };
        let jobs = self.queue.claim_batch(self.settings.batch_size).await?;
        Ok((requeued, jobs))
    }

    /// Exports one claimed job and records the result. Never fails: errors
    /// and panics become retry or error transitions.
    async fn execute(&self, job: &mut ExportJob, report: &mut RunReport) {
        let attempt_id = job.subject_id;
        let exporter = Arc::clone(&self.exporter);
        let result = AssertUnwindSafe(async move { exporter.export(attempt_id).await })
            .catch_unwind()
            .await;

        let failure = match result {
            Ok(Ok(outcome)) => {
                debug!(job_id = %job.id, filename = %outcome.filename, "Export job succeeded");
                None
            }
            Ok(Err(err)) => Some(err.to_string()),
            Err(panic) => Some(panic_message(panic)),
        };

        match failure {
            None => match self.queue.mark_processed(job).await {
                Ok(()) => report.processed += 1,
                Err(err) => error!(job_id = %job.id, error = %err, "Failed to mark job processed"),
            },
            Some(message) => {
                error!(
                    job_id = %job.id,
                    attempt_id,
                    attempts_made = job.attempts_made,
                    error = %message,
                    "Export job failed"
                );
                match self
                    .queue
                    .record_failure(job, message, self.settings.max_retries)
                    .await
                {
                    Ok(JobStatus::Waiting) => report.retried += 1,
                    Ok(_) => {
                        warn!(job_id = %job.id, attempt_id, "Export job failed permanently");
                        report.failed += 1;
                    }
                    Err(err) => {
                        error!(job_id = %job.id, error = %err, "Failed to record job failure")
                    }
                }
            }
        }

        telemetry::record_job_telemetry(job);
    }

    /// Calls [`run_once`](Self::run_once) every `interval` until `shutdown`
    /// is cancelled. A run in progress is always finished.
    pub async fn run_forever(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.run_once().await {
                Ok(outcome) => debug!(?outcome, "Scheduler run complete"),
                Err(err) => error!(error = %err, "Scheduler run failed"),
            }
        }
        info!("Scheduler stopped");
    }
}
