//! Download job records as seen by the engine and its callers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a download job.
///
/// `queued → running → {succeeded, failed}`. Terminal states go back to
/// `queued` only through an explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl DownloadStatus {
    /// The states [`is_terminal`](Self::is_terminal) accepts.
    pub const TERMINAL: [DownloadStatus; 2] = [DownloadStatus::Succeeded, DownloadStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Queued => "queued",
            DownloadStatus::Running => "running",
            DownloadStatus::Succeeded => "succeeded",
            DownloadStatus::Failed => "failed",
        }
    }

    /// Active jobs block re-submission of their URLs. Everything except
    /// `failed` is active.
    pub fn is_active(&self) -> bool {
        !matches!(self, DownloadStatus::Failed)
    }

    /// `succeeded` and `failed`; the only states retry and delete accept.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Succeeded | DownloadStatus::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown download status '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for DownloadStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(DownloadStatus::Queued),
            "running" => Ok(DownloadStatus::Running),
            "succeeded" => Ok(DownloadStatus::Succeeded),
            "failed" => Ok(DownloadStatus::Failed),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

/// A download job together with the files its last successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Download {
    pub id: Uuid,
    pub status: DownloadStatus,
    pub urls: Vec<String>,
    pub label: Option<String>,
    pub post_title: Option<String>,
    pub output_path: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub items: Vec<DownloadItem>,
}

/// One file produced by a job's successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadItem {
    pub id: Uuid,
    pub download_id: Uuid,
    pub filename: String,
    /// Path relative to the owning job's `output_path`.
    pub relative_path: String,
    pub file_size: Option<u64>,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a job record.
#[derive(Debug, Clone)]
pub struct NewDownload {
    pub id: Uuid,
    pub urls: Vec<String>,
    pub label: Option<String>,
    pub post_title: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl NewDownload {
    /// A fresh record with a generated id, requested now.
    pub fn new(urls: Vec<String>, label: Option<String>, post_title: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            urls,
            label,
            post_title,
            requested_at: Utc::now(),
        }
    }
}

/// Input for a produced file record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub filename: String,
    pub relative_path: String,
    pub file_size: Option<u64>,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Optional columns written alongside a status change.
///
/// `started_at`, `finished_at` and `output_path` are only written when set.
/// `failure_reason` is always written: `None` clears a previous reason.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub output_path: Option<String>,
}

impl StatusUpdate {
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(at),
            ..Default::default()
        }
    }

    pub fn failed(at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            finished_at: Some(at),
            failure_reason: Some(reason.into()),
            ..Default::default()
        }
    }
}
