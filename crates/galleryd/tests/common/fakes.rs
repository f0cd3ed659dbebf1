//! Test doubles for the fetch, dispatch and repository seams.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use galleryd::error::WorkerError;
use galleryd::fetch::{FetchError, FetchRequest, FetchedFile, Fetcher};
use galleryd::jobs::{
    Download, DownloadStatus, JobRepository, NewDownload, NewItem, RepoResult, SqliteJobRepository,
    StatusUpdate,
};
use galleryd::worker::{Dispatcher, DownloadTask};

/// Writes a fixed set of files into the destination, or fails like a
/// process that exited non-zero.
pub struct FakeFetcher {
    files: Vec<String>,
    failure: Option<(i32, String)>,
    requests: Mutex<Vec<FetchRequest>>,
}

impl FakeFetcher {
    /// Succeeds with `files`, given as `/`-separated paths relative to the
    /// destination.
    pub fn writing(files: &[&str]) -> Self {
        Self {
            files: files.iter().map(|f| f.to_string()).collect(),
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(code: i32, stderr: &str) -> Self {
        Self {
            files: Vec::new(),
            failure: Some((code, stderr.to_string())),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<FetchedFile>, FetchError> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some((code, stderr)) = &self.failure {
            return Err(FetchError::ProcessFailed {
                code: Some(*code),
                stderr: stderr.clone(),
            });
        }

        let mut fetched = Vec::new();
        for relative in &self.files {
            let path = request.destination.join(relative);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            let contents = format!("contents of {}", relative);
            std::fs::write(&path, &contents).unwrap();
            fetched.push(FetchedFile {
                path,
                relative_path: relative.clone(),
                size: contents.len() as u64,
            });
        }
        Ok(fetched)
    }
}

/// Collects enqueued tasks instead of running them.
#[derive(Default)]
pub struct RecordingDispatcher {
    tasks: Mutex<Vec<DownloadTask>>,
    reject: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later enqueue fail.
    pub fn reject_all(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn tasks(&self) -> Vec<DownloadTask> {
        self.tasks.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<DownloadTask> {
        std::mem::take(&mut *self.tasks.lock().unwrap())
    }
}

impl Dispatcher for RecordingDispatcher {
    fn enqueue(&self, task: DownloadTask) -> Result<(), WorkerError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(WorkerError::ChannelClosed);
        }
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}

/// SQLite repository whose next `misses` active-URL lookups come back
/// empty, as if another submission committed right after the check.
pub struct RacingRepository {
    inner: Arc<SqliteJobRepository>,
    misses: AtomicUsize,
}

impl RacingRepository {
    pub fn new(inner: Arc<SqliteJobRepository>, misses: usize) -> Self {
        Self {
            inner,
            misses: AtomicUsize::new(misses),
        }
    }
}

impl JobRepository for RacingRepository {
    fn create(&self, new: NewDownload) -> RepoResult<Download> {
        self.inner.create(new)
    }

    fn get(&self, id: &Uuid) -> RepoResult<Option<Download>> {
        self.inner.get(id)
    }

    fn list(&self) -> RepoResult<Vec<Download>> {
        self.inner.list()
    }

    fn find_active_by_urls(&self, urls: &[String]) -> RepoResult<Option<Download>> {
        let missed = self
            .misses
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if missed {
            return Ok(None);
        }
        self.inner.find_active_by_urls(urls)
    }

    fn find_failed_by_urls(&self, urls: &[String]) -> RepoResult<Option<Download>> {
        self.inner.find_failed_by_urls(urls)
    }

    fn delete(&self, id: &Uuid) -> RepoResult<bool> {
        self.inner.delete(id)
    }

    fn delete_when(&self, id: &Uuid, statuses: &[DownloadStatus]) -> RepoResult<bool> {
        self.inner.delete_when(id, statuses)
    }

    fn update_status(
        &self,
        id: &Uuid,
        status: DownloadStatus,
        update: StatusUpdate,
    ) -> RepoResult<Option<Download>> {
        self.inner.update_status(id, status, update)
    }

    fn transition(
        &self,
        id: &Uuid,
        from: &[DownloadStatus],
        to: DownloadStatus,
        update: StatusUpdate,
    ) -> RepoResult<Option<Download>> {
        self.inner.transition(id, from, to, update)
    }

    fn append_items(&self, id: &Uuid, items: &[NewItem]) -> RepoResult<Option<Download>> {
        self.inner.append_items(id, items)
    }

    fn complete(
        &self,
        id: &Uuid,
        items: &[NewItem],
        finished_at: DateTime<Utc>,
        output_path: &str,
    ) -> RepoResult<Option<Download>> {
        self.inner.complete(id, items, finished_at, output_path)
    }

    fn reset_for_retry(&self, id: &Uuid, requested_at: DateTime<Utc>) -> RepoResult<Option<Download>> {
        self.inner.reset_for_retry(id, requested_at)
    }

    fn set_post_title(&self, id: &Uuid, post_title: &str) -> RepoResult<Option<Download>> {
        self.inner.set_post_title(id, post_title)
    }
}
