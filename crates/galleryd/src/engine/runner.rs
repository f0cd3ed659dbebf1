//! Worker-side execution of a single download task.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn};

use super::RunError;
use crate::broadcast::{NotificationBroadcaster, NotificationEvent};
use crate::config::RuntimeConfigProvider;
use crate::fetch::{FetchRequest, FetchedFile, Fetcher};
use crate::jobs::{Download, DownloadStatus, JobRepository, NewDownload, NewItem, StatusUpdate};
use crate::storage::{FileSystemStorage, FolderLayout};
use crate::worker::{DownloadTask, TaskHandler};

#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Handed to the fetcher; skipped when the file does not exist.
    pub fetch_config_path: Option<PathBuf>,
}

/// Drives one task through `running` to `succeeded` or `failed`.
pub struct JobRunner {
    repo: Arc<dyn JobRepository>,
    fetcher: Arc<dyn Fetcher>,
    broadcaster: Arc<NotificationBroadcaster>,
    runtime: RuntimeConfigProvider,
    options: RunnerOptions,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn detect_mime_type(file: &FetchedFile) -> Option<String> {
    mime_guess::from_path(&file.path).first().map(|m| m.to_string())
}

impl JobRunner {
    pub fn new(
        repo: Arc<dyn JobRepository>,
        fetcher: Arc<dyn Fetcher>,
        broadcaster: Arc<NotificationBroadcaster>,
        runtime: RuntimeConfigProvider,
        options: RunnerOptions,
    ) -> Self {
        Self {
            repo,
            fetcher,
            broadcaster,
            runtime,
            options,
        }
    }

    /// Runs `task` to completion.
    ///
    /// Any failure is recorded on the job (status, `finished_at`, reason)
    /// and broadcast before it is returned. An abandoned attempt leaves the
    /// job alone.
    pub fn run(&self, task: &DownloadTask) -> Result<Download, RunError> {
        let _span = info_span!(
            "download",
            id = %task.download_id,
            attempt = task.attempt,
            urls = task.urls.len(),
        )
        .entered();

        let result = self
            .start(task)
            .and_then(|running| self.execute(&running, task));

        match result {
            Ok(done) => {
                info!(
                    "Download {} finished with {} files",
                    done.id,
                    done.items.len()
                );
                self.broadcaster
                    .broadcast(&NotificationEvent::from_download(&done));
                Ok(done)
            }
            Err(e) if e.is_abandoned() => {
                warn!("Dropping attempt {} of download {}: {}", task.attempt, task.download_id, e);
                Err(e)
            }
            Err(e) => {
                error!("Download {} failed: {}", task.download_id, e);
                self.record_failure(task, &e);
                Err(e)
            }
        }
    }

    /// `queued → running` on the first attempt, creating the job when the
    /// task was queued without one. Later attempts only pick up a job that
    /// is still `failed` from the attempt before.
    pub fn start(&self, task: &DownloadTask) -> Result<Download, RunError> {
        if task.urls.is_empty() {
            return Err(RunError::NoUrls);
        }

        let from = if task.attempt <= 1 {
            match self.repo.get(&task.download_id)? {
                None => {
                    warn!(
                        "Download {} not in store; creating it from the task",
                        task.download_id
                    );
                    self.repo.create(NewDownload {
                        id: task.download_id,
                        urls: task.urls.clone(),
                        label: None,
                        post_title: task.post_title.clone(),
                        requested_at: Utc::now(),
                    })?;
                }
                Some(existing) => {
                    if let (None, Some(title)) = (&existing.post_title, &task.post_title) {
                        self.repo.set_post_title(&existing.id, title)?;
                    }
                }
            }
            DownloadStatus::Queued
        } else {
            DownloadStatus::Failed
        };

        let running = match self.repo.transition(
            &task.download_id,
            &[from],
            DownloadStatus::Running,
            StatusUpdate::started(Utc::now()),
        )? {
            Some(running) => running,
            None => {
                return Err(match self.repo.get(&task.download_id)? {
                    None => RunError::Vanished(task.download_id),
                    Some(current) => RunError::Superseded {
                        id: task.download_id,
                        status: current.status,
                    },
                })
            }
        };

        self.broadcaster
            .broadcast(&NotificationEvent::from_download(&running));
        Ok(running)
    }

    fn execute(&self, job: &Download, task: &DownloadTask) -> Result<Download, RunError> {
        let runtime = self.runtime.resolve()?;
        let first_url = task.urls.first().ok_or(RunError::NoUrls)?;

        let folder = job
            .post_title
            .clone()
            .unwrap_or_else(|| job.id.to_string());
        let layout = FolderLayout::new(&runtime.storage_root);
        let storage = FileSystemStorage::new(&runtime.storage_root);
        let destination = storage.prepare_destination(&layout.destination(&folder, first_url))?;
        debug!("Destination for {}: {}", job.id, destination.display());

        let request = FetchRequest {
            destination: destination.clone(),
            urls: task.urls.clone(),
            extra_args: runtime.extra_args()?,
            config_path: self.options.fetch_config_path.clone(),
            timeout: task.timeout,
        };
        let files = self.fetcher.fetch(&request)?;

        let finished_at = Utc::now();
        let items: Vec<NewItem> = files
            .iter()
            .map(|file| NewItem {
                filename: file.filename(),
                relative_path: file.relative_path.clone(),
                file_size: Some(file.size),
                content_type: detect_mime_type(file),
                created_at: finished_at,
            })
            .collect();

        self.repo
            .complete(
                &job.id,
                &items,
                finished_at,
                &destination.to_string_lossy(),
            )?
            .ok_or(RunError::Vanished(job.id))
    }

    fn record_failure(&self, task: &DownloadTask, err: &RunError) {
        let update = StatusUpdate::failed(Utc::now(), err.to_string());
        match self
            .repo
            .update_status(&task.download_id, DownloadStatus::Failed, update)
        {
            Ok(Some(failed)) => {
                self.broadcaster
                    .broadcast(&NotificationEvent::from_download(&failed));
            }
            Ok(None) => warn!(
                "Download {} not found while recording failure",
                task.download_id
            ),
            Err(e) => error!(
                "Failed to record failure of download {}: {}",
                task.download_id, e
            ),
        }
    }
}

impl TaskHandler for JobRunner {
    fn handle(&self, task: &DownloadTask) -> Result<usize, RunError> {
        self.run(task).map(|done| done.items.len())
    }
}
