//! Lifecycle events pushed to live subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::jobs::{Download, DownloadStatus};

/// Which transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl From<DownloadStatus> for EventKind {
    fn from(status: DownloadStatus) -> Self {
        match status {
            DownloadStatus::Queued => EventKind::Queued,
            DownloadStatus::Running => EventKind::Running,
            DownloadStatus::Succeeded => EventKind::Succeeded,
            DownloadStatus::Failed => EventKind::Failed,
        }
    }
}

/// One JSON text frame per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub download_id: Uuid,
    pub urls: Vec<String>,
    pub post_title: Option<String>,
    pub label: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

impl NotificationEvent {
    /// An event describing `download` in its current state, stamped now.
    pub fn from_download(download: &Download) -> Self {
        Self {
            kind: download.status.into(),
            download_id: download.id,
            urls: download.urls.clone(),
            post_title: download.post_title.clone(),
            label: download.label.clone(),
            timestamp: Utc::now(),
            failure_reason: download.failure_reason.clone(),
            output_path: download.output_path.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// First frame on every subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomeFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl Default for WelcomeFrame {
    fn default() -> Self {
        Self {
            kind: "welcome".to_string(),
            message: "notifications-ready".to_string(),
        }
    }
}
