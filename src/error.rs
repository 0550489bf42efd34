//! Error taxonomy for the pack-build pipeline.
//!
//! Every variant maps to one `error_kind` recorded on a job's terminal
//! `failed` event. Per-file decode problems are not errors; they surface as
//! [`FileOutcome::Skipped`](crate::package::FileOutcome::Skipped).

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    /// Unsupported source kind, missing value, or unusable archive or key.
    #[error("{0}")]
    InvalidInput(String),

    /// Fetch or clone failure in an external collaborator.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// Upload failed after packaging succeeded. The archive is kept.
    #[error("storage failure: {message} (archive kept at {})", archive.display())]
    Storage { message: String, archive: PathBuf },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("job {0} already reached a terminal status")]
    JobFinished(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl PackError {
    /// Stable label written as `error_kind` on failure events.
    pub fn kind(&self) -> &'static str {
        match self {
            PackError::InvalidInput(_) => "invalid_input",
            PackError::Upstream(_) => "upstream",
            PackError::Storage { .. } => "storage",
            PackError::JobNotFound(_) => "job_not_found",
            PackError::JobFinished(_) => "job_finished",
            PackError::Internal(_) => "internal",
        }
    }

    /// Human-readable message including the full context chain.
    pub fn message(&self) -> String {
        match self {
            PackError::Internal(err) => format!("{:#}", err),
            other => other.to_string(),
        }
    }
}

impl From<std::io::Error> for PackError {
    fn from(err: std::io::Error) -> Self {
        PackError::Internal(err.into())
    }
}

pub type PackResult<T> = std::result::Result<T, PackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(PackError::InvalidInput("x".into()).kind(), "invalid_input");
        assert_eq!(PackError::Upstream("x".into()).kind(), "upstream");
        let storage = PackError::Storage {
            message: "bucket gone".into(),
            archive: PathBuf::from("/tmp/a.zip"),
        };
        assert_eq!(storage.kind(), "storage");
        assert!(storage.to_string().contains("/tmp/a.zip"));
        let internal: PackError = std::io::Error::other("disk full").into();
        assert_eq!(internal.kind(), "internal");
    }
}
