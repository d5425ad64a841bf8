//! Redis-backed job store shared by every worker process.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands, Script};
use tracing::debug;
use uuid::Uuid;

use super::JobStore;
use crate::error::{ExportError, Result};
use crate::job::{ExportJob, JobStatus};

/// Key prefix for all job data.
const KEY_PREFIX: &str = "attemptexport";

const ALL_STATUSES: [JobStatus; 4] = [
    JobStatus::Waiting,
    JobStatus::Processing,
    JobStatus::Processed,
    JobStatus::Error,
];

/// Claims one job if it is still waiting and unchanged since it was read.
///
/// KEYS: job, waiting set, Waiting status set, Processing status set.
/// ARGV: id, JSON as read, claimed JSON. Returns 1 when claimed.
const CLAIM_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) ~= ARGV[2] then
    return 0
end
if redis.call('ZREM', KEYS[2], ARGV[1]) == 0 then
    return 0
end
redis.call('SET', KEYS[1], ARGV[3])
redis.call('SREM', KEYS[3], ARGV[1])
redis.call('SADD', KEYS[4], ARGV[1])
return 1
"#;

/// Redis job store.
///
/// Layout:
/// - `attemptexport:job:{id}` holds the job as JSON (no TTL, kept for audit).
/// - `attemptexport:waiting` is a sorted set of Waiting ids scored by
///   creation time, which gives FIFO claiming.
/// - `attemptexport:status:{code}` is a set of ids per status.
///
/// A claim runs [`CLAIM_SCRIPT`]: removing the id from the waiting set,
/// storing the Processing record and moving the status sets happen in one
/// server-side step. Only the caller whose script removed the member owns the
/// job, so two processes can never claim the same job even without the claim
/// lock, and a crash mid-claim cannot leave a Waiting job outside the waiting
/// set.
pub struct RedisJobStore {
    conn: ConnectionManager,
    claim: Script,
}

impl RedisJobStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            claim: Script::new(CLAIM_SCRIPT),
        }
    }

    fn job_key(id: Uuid) -> String {
        format!("{}:job:{}", KEY_PREFIX, id)
    }

    fn waiting_key() -> String {
        format!("{}:waiting", KEY_PREFIX)
    }

    fn status_key(status: JobStatus) -> String {
        format!("{}:status:{}", KEY_PREFIX, status.code())
    }

    fn queue_score(job: &ExportJob) -> f64 {
        job.created_at.timestamp_micros() as f64
    }

    async fn load_raw(&self, id: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let key = format!("{}:job:{}", KEY_PREFIX, id);
        Ok(conn.get(&key).await?)
    }

    async fn load(&self, id: &str) -> Result<Option<ExportJob>> {
        match self.load_raw(id).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn write(&self, job: &ExportJob) -> Result<()> {
        let json = serde_json::to_string(job)?;
        let id = job.id.to_string();

        let mut pipe = redis::pipe();
        pipe.atomic().set(Self::job_key(job.id), &json).ignore();
        for status in ALL_STATUSES {
            if status == job.status {
                pipe.sadd(Self::status_key(status), &id).ignore();
            } else {
                pipe.srem(Self::status_key(status), &id).ignore();
            }
        }
        if job.status == JobStatus::Waiting {
            pipe.zadd(Self::waiting_key(), &id, Self::queue_score(job))
                .ignore();
        } else {
            pipe.zrem(Self::waiting_key(), &id).ignore();
        }

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await?;
        debug!(job_id = %job.id, status = %job.status, "Stored export job");
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &ExportJob) -> Result<()> {
        self.write(job).await
    }

    async fn claim_waiting(&self, max: usize, now: DateTime<Utc>) -> Result<Vec<ExportJob>> {
        let mut conn = self.conn.clone();
        let stop = max.saturating_sub(1) as isize;
        let candidates: Vec<String> = conn.zrange(Self::waiting_key(), 0, stop).await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(read) = self.load_raw(&id).await? else {
                return Err(ExportError::Store(format!(
                    "waiting set references missing job {}",
                    id
                )));
            };
            let mut job: ExportJob = serde_json::from_str(&read)?;
            if job.status != JobStatus::Waiting {
                continue;
            }
            job.claim(now)?;
            let updated = serde_json::to_string(&job)?;

            let won: i64 = self
                .claim
                .key(Self::job_key(job.id))
                .key(Self::waiting_key())
                .key(Self::status_key(JobStatus::Waiting))
                .key(Self::status_key(JobStatus::Processing))
                .arg(&id)
                .arg(&read)
                .arg(&updated)
                .invoke_async(&mut conn)
                .await?;
            if won == 0 {
                // Another process got there first.
                continue;
            }
            debug!(job_id = %job.id, "Claimed export job");
            claimed.push(job);
        }
        Ok(claimed)
    }

    async fn save(&self, job: &ExportJob) -> Result<()> {
        self.write(job).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExportJob>> {
        self.load(&id.to_string()).await
    }

    async fn list_by_status(&self, status: JobStatus) -> Result<Vec<ExportJob>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(Self::status_key(status)).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load(&id).await? {
                jobs.push(job);
            }
        }
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::ExportJobQueue;
    use std::sync::Arc;

    // These tests require a running Redis instance.
    // Run with: docker run -d -p 6379:6379 redis:7-alpine
    // Skip in CI: cargo test --lib -- --skip redis_store::tests

    async fn store() -> RedisJobStore {
        let client = redis::Client::open("redis://127.0.0.1/").unwrap();
        let conn = ConnectionManager::new(client).await.unwrap();
        RedisJobStore::new(conn)
    }

    #[tokio::test]
    #[ignore]
    async fn test_enqueue_claim() {
        let queue = ExportJobQueue::new(Arc::new(store().await));

        let job = queue.enqueue(123).await.unwrap();
        let claimed = queue.claim_batch(100).await.unwrap();
        assert!(claimed.iter().any(|c| c.id == job.id));

        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);
    }

    #[tokio::test]
    #[ignore]
    async fn test_claim_moves_job_between_sets_at_once() {
        let store = store().await;
        let mut conn = store.conn.clone();
        let queue = ExportJobQueue::new(Arc::new(store));
        let job = queue.enqueue(789).await.unwrap();
        let id = job.id.to_string();

        let claimed = queue.claim_batch(100).await.unwrap();
        assert!(claimed.iter().any(|c| c.id == job.id));

        let waiting: Option<f64> = conn.zscore(RedisJobStore::waiting_key(), &id).await.unwrap();
        assert!(waiting.is_none());
        let in_waiting: bool = conn
            .sismember(RedisJobStore::status_key(JobStatus::Waiting), &id)
            .await
            .unwrap();
        let in_processing: bool = conn
            .sismember(RedisJobStore::status_key(JobStatus::Processing), &id)
            .await
            .unwrap();
        assert!(!in_waiting);
        assert!(in_processing);
    }

    #[tokio::test]
    #[ignore]
    async fn test_concurrent_claims_take_each_job_once() {
        let first = ExportJobQueue::new(Arc::new(store().await));
        let second = ExportJobQueue::new(Arc::new(store().await));
        let mut ids = Vec::new();
        for subject in 0..10 {
            ids.push(first.enqueue(1000 + subject).await.unwrap().id);
        }

        let (a, b) = tokio::join!(first.claim_batch(100), second.claim_batch(100));
        let mut mine: Vec<Uuid> = a
            .unwrap()
            .into_iter()
            .chain(b.unwrap())
            .map(|job| job.id)
            .filter(|id| ids.contains(id))
            .collect();
        let total = mine.len();
        mine.sort();
        mine.dedup();
        assert_eq!(mine.len(), total);
        assert_eq!(total, ids.len());
    }

    #[tokio::test]
    #[ignore]
    async fn test_status_tracking() {
        let queue = ExportJobQueue::new(Arc::new(store().await));

        let job = queue.enqueue(456).await.unwrap();
        let status = queue.get(job.id).await.unwrap();
        assert_eq!(status.unwrap().status, JobStatus::Waiting);

        let mut claimed = queue
            .claim_batch(100)
            .await
            .unwrap()
            .into_iter()
            .find(|c| c.id == job.id)
            .unwrap();
        queue.mark_processed(&mut claimed).await.unwrap();

        let updated = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(updated.status, JobStatus::Processed);
        assert!(queue
            .list_by_status(JobStatus::Processed)
            .await
            .unwrap()
            .iter()
            .any(|j| j.id == job.id));
    }
}
