use std::time::Duration;

use uuid::Uuid;

use crate::error::WorkerError;

/// Everything a worker needs to run one download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTask {
    pub download_id: Uuid,
    pub urls: Vec<String>,
    pub post_title: Option<String>,
    /// Resolved when the task is enqueued. `None` runs without a limit.
    pub timeout: Option<Duration>,
    /// 1-based.
    pub attempt: u32,
}

impl DownloadTask {
    pub fn new(download_id: Uuid, urls: Vec<String>, post_title: Option<String>) -> Self {
        Self {
            download_id,
            urls,
            post_title,
            timeout: None,
            attempt: 1,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded { files: usize },
    Failed { reason: String, will_retry: bool },
}

/// The pool's own record of an attempt, independent of the job store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    pub download_id: Uuid,
    pub attempt: u32,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded { .. })
    }
}

/// Hands tasks to whatever executes them.
pub trait Dispatcher: Send + Sync {
    fn enqueue(&self, task: DownloadTask) -> Result<(), WorkerError>;
}
