//! Cross-process claim lock backed by an atomically created directory.
//!
//! Directory creation either succeeds or fails as a whole, which makes it a
//! usable mutual-exclusion marker for scheduler instances that share a
//! filesystem (e.g. cluster nodes on shared storage).

use rand::Rng;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Name of the lock directory inside the temp directory.
pub const LOCK_DIR_NAME: &str = "quizattemptexport_lockdir";

const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Acquisition policy for the claim lock.
#[derive(Debug, Clone)]
pub struct ClaimLock {
    path: PathBuf,
    max_attempts: u32,
    /// Sleep between attempts is a random multiple (1..=5) of this unit.
    backoff_unit: Duration,
}

impl ClaimLock {
    /// Lock at `{temp_dir}/quizattemptexport_lockdir` with 10 attempts and a
    /// 1-5 second randomized backoff.
    pub fn in_dir(temp_dir: &Path) -> Self {
        Self::new(temp_dir.join(LOCK_DIR_NAME))
    }

    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_unit: Duration::from_secs(1),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Tries to create the lock directory, sleeping between attempts.
    ///
    /// Returns `None` when every attempt failed. The lock is released when
    /// the returned guard is dropped.
    pub async fn acquire(&self) -> Option<LockGuard> {
        for attempt in 1..=self.max_attempts {
            match tokio::fs::create_dir(&self.path).await {
                Ok(()) => {
                    debug!(path = %self.path.display(), attempt, "Claim lock acquired");
                    return Some(LockGuard {
                        path: self.path.clone(),
                        released: false,
                    });
                }
                Err(err) => {
                    if err.kind() != ErrorKind::AlreadyExists {
                        warn!(path = %self.path.display(), error = %err, "Claim lock creation failed");
                    }
                    if attempt < self.max_attempts {
                        let factor = rand::rng().random_range(1..=5u32);
                        tokio::time::sleep(self.backoff_unit * factor).await;
                    }
                }
            }
        }
        None
    }
}

/// Held claim lock. Dropping it removes the lock directory.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    released: bool,
}

impl LockGuard {
    pub async fn release(mut self) {
        if let Err(err) = tokio::fs::remove_dir(&self.path).await {
            warn!(path = %self.path.display(), error = %err, "Failed to remove claim lock");
        }
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            if let Err(err) = std::fs::remove_dir(&self.path) {
                warn!(path = %self.path.display(), error = %err, "Failed to remove claim lock");
            }
        }
    }
}
