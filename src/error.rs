//! Error taxonomy for the export pipeline.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

/// Result alias used across the library.
pub type Result<T, E = ExportError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ExportError {
    /// A setting is missing or holds a value we cannot use.
    #[error("setting `{setting}` is missing or invalid: {reason}")]
    Config { setting: String, reason: String },

    #[error("export directory missing: {}", .0.display())]
    DirectoryMissing(PathBuf),

    #[error("export directory is not writable: {}", .0.display())]
    DirectoryNotWritable(PathBuf),

    #[error("attempt {0} could not be found")]
    SubjectNotFound(i64),

    #[error("user {0} could not be found")]
    UserNotFound(i64),

    /// The converter process failed and left no usable output behind.
    #[error("PDF conversion failed: {0}")]
    Conversion(String),

    #[error("PDF conversion timed out after {0:?}")]
    ConversionTimeout(Duration),

    /// The converter reported success but produced nothing usable.
    #[error("PDF conversion produced no usable output at {}", .0.display())]
    EmptyOutput(PathBuf),

    #[error("job store error: {0}")]
    Store(String),

    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("render failed: {0}")]
    Render(String),

    /// Only used internally by the asset inliner; never escapes a document render.
    #[error("asset fetch failed: {0}")]
    Fetch(String),

    #[error("HTML rewrite failed: {0}")]
    Rewrite(String),

    #[error("permission denied: {0}")]
    PermissionDenied(&'static str),

    #[error("artifact not found")]
    NotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    #[error(transparent)]
    Template(#[from] askama::Error),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl ExportError {
    pub fn config(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        ExportError::Config {
            setting: setting.into(),
            reason: reason.into(),
        }
    }
}

impl From<lol_html::errors::RewritingError> for ExportError {
    fn from(err: lol_html::errors::RewritingError) -> Self {
        ExportError::Rewrite(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_message() {
        let err = ExportError::config("PDF_EXPORT_DIR", "not set");
        assert_eq!(
            err.to_string(),
            "setting `PDF_EXPORT_DIR` is missing or invalid: not set"
        );
    }

    #[test]
    fn test_transition_error_message() {
        let id = Uuid::nil();
        let err = ExportError::InvalidTransition {
            id,
            from: JobStatus::Processed,
            to: JobStatus::Processing,
        };
        assert!(err.to_string().contains("processed"));
        assert!(err.to_string().contains("processing"));
    }
}
