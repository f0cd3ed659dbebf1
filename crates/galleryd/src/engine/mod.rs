//! Download lifecycle: caller-facing [`JobEngine`] and worker-facing
//! [`JobRunner`].

pub mod lifecycle;
pub mod runner;

use thiserror::Error;
use uuid::Uuid;

use crate::error::{ConfigError, StorageError, WorkerError};
use crate::fetch::FetchError;
use crate::jobs::{DownloadStatus, RepositoryError};

pub use lifecycle::{normalize_urls, JobEngine, RecoveryReport, SubmitOutcome, SubmitRequest};
pub use runner::{JobRunner, RunnerOptions};

/// Errors surfaced to callers of [`JobEngine`].
#[derive(Error, Debug)]
pub enum EngineError {
    /// Rejected before anything was persisted.
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Download {id} is {status}")]
    Conflict { id: Uuid, status: DownloadStatus },

    /// A concurrent submission claimed a URL and then vanished.
    #[error("URL is claimed by another download: {0}")]
    UrlConflict(String),

    #[error("Download {0} not found")]
    NotFound(Uuid),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Failed to dispatch download: {0}")]
    Dispatch(#[from] WorkerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict { .. } | EngineError::UrlConflict(_))
    }
}

/// Why a run failed. By the time a worker sees this the job is already
/// recorded as failed, unless [`RunError::is_abandoned`].
#[derive(Error, Debug)]
pub enum RunError {
    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Repository(#[from] RepositoryError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Download {0} disappeared while running")]
    Vanished(Uuid),

    /// A later attempt found the job moved on, e.g. retried by a caller.
    #[error("Download {id} is {status}; attempt dropped")]
    Superseded { id: Uuid, status: DownloadStatus },

    #[error("Download task has no URLs")]
    NoUrls,
}

impl RunError {
    /// The task no longer owns its job. Nothing is recorded on the job and
    /// the attempt is not repeated.
    pub fn is_abandoned(&self) -> bool {
        matches!(self, RunError::Vanished(_) | RunError::Superseded { .. })
    }
}
