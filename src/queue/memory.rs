//! In-process job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::JobStore;
use crate::error::Result;
use crate::job::{ExportJob, JobStatus};

/// Job store backed by a mutex-guarded map.
///
/// Claims happen under the mutex, so concurrent claimers within one process
/// never receive the same job.
#[derive(Default)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, ExportJob>,
    /// Insertion order; breaks ties between identical creation timestamps.
    order: Vec<Uuid>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &ExportJob) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.insert(job.id, job.clone()).is_none() {
            inner.order.push(job.id);
        }
        Ok(())
    }

    async fn claim_waiting(&self, max: usize, now: DateTime<Utc>) -> Result<Vec<ExportJob>> {
        let mut inner = self.inner.lock().await;
        let Inner { jobs, order } = &mut *inner;

        let mut waiting: Vec<(usize, Uuid, DateTime<Utc>)> = order
            .iter()
            .enumerate()
            .filter_map(|(position, id)| {
                jobs.get(id)
                    .filter(|job| job.status == JobStatus::Waiting)
                    .map(|job| (position, *id, job.created_at))
            })
            .collect();
        waiting.sort_by_key(|(position, _, created_at)| (*created_at, *position));

        let mut claimed = Vec::new();
        for (_, id, _) in waiting.into_iter().take(max) {
            if let Some(job) = jobs.get_mut(&id) {
                job.claim(now)?;
                claimed.push(job.clone());
            }
        }
        Ok(claimed)
    }

    async fn save(&self, job: &ExportJob) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.jobs.contains_key(&job.id) {
            inner.order.push(job.id);
        }
        inner.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<ExportJob>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.jobs.get(id))
            .filter(|job| job.status == status)
            .cloned()
            .collect())
    }
}
