//! Caller-facing job operations: submit, inspect, retry, delete.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::EngineError;
use crate::broadcast::{NotificationBroadcaster, NotificationEvent};
use crate::config::{RuntimeConfig, RuntimeConfigProvider, RuntimeSettingsUpdate};
use crate::jobs::{Download, DownloadStatus, JobRepository, NewDownload, RepositoryError, StatusUpdate};
use crate::worker::{Dispatcher, DownloadTask};

const MAX_PRIORITY: i64 = 10;

/// A request to download one or more URLs as a single job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub post_title: Option<String>,
    /// Accepted and range-checked (0..=10); not used for ordering.
    #[serde(default)]
    pub priority: Option<i64>,
}

impl SubmitRequest {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_post_title(mut self, post_title: impl Into<String>) -> Self {
        self.post_title = Some(post_title.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Result of [`JobEngine::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// A fresh job was queued.
    Created(Download),
    /// An active job already tracks one of the URLs; nothing changed.
    Existing(Download),
}

impl SubmitOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, SubmitOutcome::Created(_))
    }

    pub fn download(&self) -> &Download {
        match self {
            SubmitOutcome::Created(d) | SubmitOutcome::Existing(d) => d,
        }
    }

    pub fn into_download(self) -> Download {
        match self {
            SubmitOutcome::Created(d) | SubmitOutcome::Existing(d) => d,
        }
    }
}

/// What [`JobEngine::recover`] did with jobs left over from a previous run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub interrupted: usize,
}

/// Trims, parses and de-duplicates submitted URLs, keeping first
/// occurrences in order. URLs come back in normalized form.
pub fn normalize_urls(urls: &[String]) -> Result<Vec<String>, EngineError> {
    let mut normalized: Vec<String> = Vec::with_capacity(urls.len());

    for raw in urls {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::Validation("URL must not be empty".to_string()));
        }
        let url = Url::parse(trimmed)
            .map_err(|e| EngineError::Validation(format!("Invalid URL '{}': {}", trimmed, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(EngineError::Validation(format!(
                "Unsupported URL '{}': only http and https are accepted",
                trimmed
            )));
        }

        let url = String::from(url);
        if !normalized.contains(&url) {
            normalized.push(url);
        }
    }

    if normalized.is_empty() {
        return Err(EngineError::Validation(
            "At least one URL is required".to_string(),
        ));
    }
    Ok(normalized)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// The central coordinator for callers. Cheap to share behind an `Arc`.
pub struct JobEngine {
    repo: Arc<dyn JobRepository>,
    dispatcher: Arc<dyn Dispatcher>,
    broadcaster: Arc<NotificationBroadcaster>,
    runtime: RuntimeConfigProvider,
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl JobEngine {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        dispatcher: Arc<dyn Dispatcher>,
        broadcaster: Arc<NotificationBroadcaster>,
        runtime: RuntimeConfigProvider,
    ) -> Self {
        Self {
            repo,
            dispatcher,
            broadcaster,
            runtime,
        }
    }

    /// Queues a download unless an active job already tracks one of its URLs.
    ///
    /// Failed jobs owning any of the URLs are deleted and replaced by the
    /// new job.
    pub fn submit(&self, request: SubmitRequest) -> Result<SubmitOutcome, EngineError> {
        if let Some(priority) = request.priority {
            if !(0..=MAX_PRIORITY).contains(&priority) {
                return Err(EngineError::Validation(format!(
                    "priority must be between 0 and {}, got {}",
                    MAX_PRIORITY, priority
                )));
            }
        }
        let urls = normalize_urls(&request.urls)?;

        if let Some(existing) = self.repo.find_active_by_urls(&urls)? {
            debug!(
                "Download {} already tracks {} ({})",
                existing.id, urls[0], existing.status
            );
            return Ok(SubmitOutcome::Existing(existing));
        }

        while let Some(stale) = self.repo.find_failed_by_urls(&urls)? {
            info!("Replacing failed download {}", stale.id);
            self.repo.delete_when(&stale.id, &[DownloadStatus::Failed])?;
        }

        let timeout = self.runtime.resolve()?.job_timeout();
        let new = NewDownload::new(urls, non_blank(request.label), non_blank(request.post_title));

        let created = match self.repo.create(new) {
            Ok(created) => created,
            Err(RepositoryError::DuplicateUrl(url)) => {
                // Lost a race with a concurrent submission.
                return match self.repo.find_active_by_urls(std::slice::from_ref(&url))? {
                    Some(existing) => Ok(SubmitOutcome::Existing(existing)),
                    None => Err(EngineError::UrlConflict(url)),
                };
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            "Queued download {} ({} URL(s))",
            created.id,
            created.urls.len()
        );
        self.broadcaster
            .broadcast(&NotificationEvent::from_download(&created));

        let task = DownloadTask::new(created.id, created.urls.clone(), created.post_title.clone())
            .with_timeout(timeout);
        self.dispatch(&created, task)?;

        Ok(SubmitOutcome::Created(created))
    }

    pub fn get(&self, id: &Uuid) -> Result<Download, EngineError> {
        self.repo.get(id)?.ok_or(EngineError::NotFound(*id))
    }

    /// Newest request first.
    pub fn list(&self) -> Result<Vec<Download>, EngineError> {
        Ok(self.repo.list()?)
    }

    /// Requeues a finished job. Items from earlier runs are kept until the
    /// next successful run replaces them.
    ///
    /// The status check and the reset are one conditional update, so of
    /// two concurrent retries only one is accepted.
    pub fn retry(&self, id: &Uuid) -> Result<Download, EngineError> {
        let timeout = self.runtime.resolve()?.job_timeout();
        let queued = match self.repo.reset_for_retry(id, Utc::now())? {
            Some(queued) => queued,
            None => return Err(self.rejection(id)),
        };

        info!("Retrying download {}", id);
        self.broadcaster
            .broadcast(&NotificationEvent::from_download(&queued));

        let task = DownloadTask::new(queued.id, queued.urls.clone(), queued.post_title.clone())
            .with_timeout(timeout);
        self.dispatch(&queued, task)?;

        Ok(queued)
    }

    /// Removes a finished job together with its items and URL claims.
    pub fn delete(&self, id: &Uuid) -> Result<Download, EngineError> {
        let current = self.get(id)?;
        if !current.status.is_terminal() {
            return Err(EngineError::Conflict {
                id: *id,
                status: current.status,
            });
        }

        if !self.repo.delete_when(id, &DownloadStatus::TERMINAL)? {
            return Err(self.rejection(id));
        }
        info!("Deleted download {}", id);
        Ok(current)
    }

    /// Why a guarded update on `id` matched nothing, judged from a fresh read.
    fn rejection(&self, id: &Uuid) -> EngineError {
        match self.repo.get(id) {
            Ok(Some(current)) => EngineError::Conflict {
                id: *id,
                status: current.status,
            },
            Ok(None) => EngineError::NotFound(*id),
            Err(e) => e.into(),
        }
    }

    pub fn runtime_settings(&self) -> Result<RuntimeConfig, EngineError> {
        Ok(self.runtime.resolve()?)
    }

    pub fn update_runtime_settings(
        &self,
        update: &RuntimeSettingsUpdate,
    ) -> Result<RuntimeConfig, EngineError> {
        Ok(self.runtime.update(update)?)
    }

    /// Re-dispatches `queued` jobs and fails `running` ones. Meant for
    /// startup, when no worker can still own a job.
    pub fn recover(&self) -> Result<RecoveryReport, EngineError> {
        let mut report = RecoveryReport::default();
        let timeout = self.runtime.resolve()?.job_timeout();

        // Oldest first so they re-enter the queue in request order.
        for download in self.repo.list()?.into_iter().rev() {
            match download.status {
                DownloadStatus::Queued => {
                    let task = DownloadTask::new(
                        download.id,
                        download.urls.clone(),
                        download.post_title.clone(),
                    )
                    .with_timeout(timeout);
                    self.dispatch(&download, task)?;
                    report.requeued += 1;
                }
                DownloadStatus::Running => {
                    self.mark_failed(&download.id, "Interrupted before completion");
                    report.interrupted += 1;
                }
                DownloadStatus::Succeeded | DownloadStatus::Failed => {}
            }
        }

        if report.requeued > 0 || report.interrupted > 0 {
            info!(
                "Recovered downloads: {} requeued, {} interrupted",
                report.requeued, report.interrupted
            );
        }
        Ok(report)
    }

    /// Enqueues `task`; on failure the job is marked failed so it does not
    /// sit in `queued` forever.
    fn dispatch(&self, download: &Download, task: DownloadTask) -> Result<(), EngineError> {
        if let Err(e) = self.dispatcher.enqueue(task) {
            error!("Failed to enqueue download {}: {}", download.id, e);
            self.mark_failed(&download.id, &format!("Failed to enqueue: {}", e));
            return Err(EngineError::Dispatch(e));
        }
        Ok(())
    }

    fn mark_failed(&self, id: &Uuid, reason: &str) {
        match self
            .repo
            .update_status(id, DownloadStatus::Failed, StatusUpdate::failed(Utc::now(), reason))
        {
            Ok(Some(failed)) => {
                self.broadcaster
                    .broadcast(&NotificationEvent::from_download(&failed));
            }
            Ok(None) => warn!("Download {} vanished before it could be marked failed", id),
            Err(e) => error!("Failed to mark download {} failed: {}", id, e),
        }
    }
}
