//! Durable queue of export jobs.
//!
//! [`ExportJobQueue`] owns the queue semantics (enqueue, claim, status
//! updates, stale sweep) and delegates persistence to a [`JobStore`]. Two
//! stores ship with the crate: [`RedisJobStore`] for multi-process
//! deployments and [`MemoryJobStore`] for tests and single-process use.

mod memory;
mod redis_store;

pub use self::memory::MemoryJobStore;
pub use self::redis_store::RedisJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::job::{ExportJob, JobStatus};

/// Persistence backend for export jobs.
///
/// `claim_waiting` must be atomic per job: a job returned to one caller is
/// never returned to another, even when several processes share the store.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &ExportJob) -> Result<()>;

    /// Moves up to `max` of the oldest Waiting jobs to Processing and returns them.
    async fn claim_waiting(&self, max: usize, now: DateTime<Utc>) -> Result<Vec<ExportJob>>;

    /// Writes back a job whose status changed after execution.
    async fn save(&self, job: &ExportJob) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>>;

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<ExportJob>>;
}

/// Queue facade used by the scheduler and the submission trigger.
#[derive(Clone)]
pub struct ExportJobQueue {
    store: Arc<dyn JobStore>,
}

impl ExportJobQueue {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Adds a Waiting job for the attempt. Duplicates are allowed.
    pub async fn enqueue(&self, subject_id: i64) -> Result<ExportJob> {
        let job = ExportJob::new(subject_id);
        self.store.insert(&job).await?;
        info!(job_id = %job.id, subject_id, "Enqueued export job");
        Ok(job)
    }

    /// Claims up to `max_count` Waiting jobs, oldest first.
    ///
    /// Callers must hold the scheduler's claim lock.
    pub async fn claim_batch(&self, max_count: usize) -> Result<Vec<ExportJob>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }
        let jobs = self.store.claim_waiting(max_count, Utc::now()).await?;
        for job in &jobs {
            debug!(job_id = %job.id, subject_id = job.subject_id, "Claimed export job");
        }
        Ok(jobs)
    }

    pub async fn mark_processed(&self, job: &mut ExportJob) -> Result<()> {
        job.mark_processed()?;
        self.store.save(job).await
    }

    pub async fn mark_retry(&self, job: &mut ExportJob) -> Result<()> {
        job.mark_retry()?;
        self.store.save(job).await
    }

    pub async fn mark_error(&self, job: &mut ExportJob) -> Result<()> {
        job.mark_error()?;
        self.store.save(job).await
    }

    /// Counts one failed run and persists the resulting Waiting/Error status.
    pub async fn record_failure(
        &self,
        job: &mut ExportJob,
        error: String,
        max_retries: u32,
    ) -> Result<JobStatus> {
        let status = job.record_failure(error, max_retries)?;
        self.store.save(job).await?;
        Ok(status)
    }

    /// Returns Processing jobs claimed before `cutoff` to the queue, counting
    /// the lost run as a failure. Callers must hold the claim lock.
    pub async fn requeue_stale(&self, cutoff: DateTime<Utc>, max_retries: u32) -> Result<usize> {
        let mut requeued = 0;
        for mut job in self.store.list_by_status(JobStatus::Processing).await? {
            if !job.is_stale(cutoff) {
                continue;
            }
            let status = self
                .record_failure(&mut job, "processing abandoned".to_string(), max_retries)
                .await?;
            warn!(
                job_id = %job.id,
                subject_id = job.subject_id,
                attempts_made = job.attempts_made,
                status = %status,
                "Recovered stale export job"
            );
            requeued += 1;
        }
        Ok(requeued)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ExportJob>> {
        self.store.get(id).await
    }

    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<ExportJob>> {
        self.store.list_by_status(status).await
    }
}
