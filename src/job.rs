//! Export job model and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ExportError, Result};

/// Number of failed runs after which a job is parked in [`JobStatus::Error`].
pub const MAX_RETRIES: u32 = 3;

/// One queued request to export an attempt.
///
/// Jobs are never deleted by this crate; finished and failed jobs stay in
/// the store for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: Uuid,
    /// Attempt this job exports.
    pub subject_id: i64,
    pub status: JobStatus,
    pub attempts_made: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the job was last claimed; the reconciliation sweep reads it.
    #[serde(default)]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// Persisted as its integer code so the stored layout stays `0..=3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum JobStatus {
    Waiting,
    Processing,
    Processed,
    Error,
}

impl JobStatus {
    pub fn code(self) -> u8 {
        match self {
            JobStatus::Waiting => 0,
            JobStatus::Processing => 1,
            JobStatus::Processed => 2,
            JobStatus::Error => 3,
        }
    }
}

impl From<JobStatus> for u8 {
    fn from(status: JobStatus) -> u8 {
        status.code()
    }
}

impl TryFrom<u8> for JobStatus {
    type Error = String;

    fn try_from(code: u8) -> std::result::Result<Self, String> {
        match code {
            0 => Ok(JobStatus::Waiting),
            1 => Ok(JobStatus::Processing),
            2 => Ok(JobStatus::Processed),
            3 => Ok(JobStatus::Error),
            other => Err(format!("unknown job status code {other}")),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Processed => write!(f, "processed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

impl ExportJob {
    pub fn new(subject_id: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id,
            status: JobStatus::Waiting,
            attempts_made: 0,
            created_at: Utc::now(),
            completed_at: None,
            claimed_at: None,
            last_error: None,
        }
    }

    fn transition(&mut self, allowed_from: JobStatus, to: JobStatus) -> Result<()> {
        if self.status != allowed_from {
            return Err(ExportError::InvalidTransition {
                id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Waiting -> Processing.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.transition(JobStatus::Waiting, JobStatus::Processing)?;
        self.claimed_at = Some(now);
        Ok(())
    }

    /// Processing -> Processed.
    pub fn mark_processed(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing, JobStatus::Processed)?;
        self.completed_at = Some(Utc::now());
        self.last_error = None;
        Ok(())
    }

    /// Processing -> Waiting, keeping the failure count already recorded.
    pub fn mark_retry(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing, JobStatus::Waiting)?;
        self.claimed_at = None;
        Ok(())
    }

    /// Processing -> Error. Permanent; the scheduler never claims it again.
    pub fn mark_error(&mut self) -> Result<()> {
        self.transition(JobStatus::Processing, JobStatus::Error)?;
        self.claimed_at = None;
        Ok(())
    }

    /// Records one failed run and moves the job back to Waiting, or to Error
    /// once `max_retries` failures have been recorded.
    pub fn record_failure(&mut self, error: String, max_retries: u32) -> Result<JobStatus> {
        if self.status != JobStatus::Processing {
            return Err(ExportError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: JobStatus::Waiting,
            });
        }
        self.attempts_made = self.attempts_made.saturating_add(1);
        self.last_error = Some(error);
        if self.attempts_made < max_retries {
            self.mark_retry()?;
        } else {
            self.mark_error()?;
        }
        Ok(self.status)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Processed | JobStatus::Error)
    }

    /// Whether the job has been in Processing since before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == JobStatus::Processing
            && self.claimed_at.map(|claimed| claimed < cutoff).unwrap_or(true)
    }

    pub fn processing_duration_ms(&self) -> Option<i64> {
        match (self.claimed_at, self.completed_at) {
            (Some(claimed), Some(completed)) => {
                Some(completed.signed_duration_since(claimed).num_milliseconds())
            }
            (None, Some(completed)) => {
                Some(completed.signed_duration_since(self.created_at).num_milliseconds())
            }
            _ => None,
        }
    }
}
