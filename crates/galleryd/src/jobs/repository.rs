//! The job record store the engine and runners talk to.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use super::model::{Download, DownloadStatus, NewDownload, NewItem, StatusUpdate};
use crate::db::{download_repo, Database, DatabaseError};

#[derive(Error, Debug)]
pub enum RepositoryError {
    /// The URL is already owned by another job.
    #[error("URL already belongs to another download: {0}")]
    DuplicateUrl(String),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl From<DatabaseError> for RepositoryError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Duplicate {
                column: "download_urls.url",
                value,
            } => RepositoryError::DuplicateUrl(value),
            other => RepositoryError::Database(other),
        }
    }
}

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

/// Persistence operations over download jobs.
///
/// Methods returning `Option<Download>` yield `None` when the id is unknown.
pub trait JobRepository: Send + Sync {
    /// Inserts a queued job and claims its URLs atomically.
    fn create(&self, new: NewDownload) -> RepoResult<Download>;

    fn get(&self, id: &Uuid) -> RepoResult<Option<Download>>;

    /// Newest request first.
    fn list(&self) -> RepoResult<Vec<Download>>;

    fn find_active_by_urls(&self, urls: &[String]) -> RepoResult<Option<Download>>;

    fn find_failed_by_urls(&self, urls: &[String]) -> RepoResult<Option<Download>>;

    /// Returns whether anything was deleted.
    fn delete(&self, id: &Uuid) -> RepoResult<bool>;

    /// Deletes only while the job's status is one of `statuses`.
    fn delete_when(&self, id: &Uuid, statuses: &[DownloadStatus]) -> RepoResult<bool>;

    fn update_status(
        &self,
        id: &Uuid,
        status: DownloadStatus,
        update: StatusUpdate,
    ) -> RepoResult<Option<Download>>;

    /// Like `update_status`, but only from one of the `from` states.
    /// `None` when the job is missing or has moved on.
    fn transition(
        &self,
        id: &Uuid,
        from: &[DownloadStatus],
        to: DownloadStatus,
        update: StatusUpdate,
    ) -> RepoResult<Option<Download>>;

    fn append_items(&self, id: &Uuid, items: &[NewItem]) -> RepoResult<Option<Download>>;

    /// Replaces the items and marks the job succeeded in one step.
    fn complete(
        &self,
        id: &Uuid,
        items: &[NewItem],
        finished_at: DateTime<Utc>,
        output_path: &str,
    ) -> RepoResult<Option<Download>>;

    /// Requeues a `succeeded` or `failed` job; `None` for any other state.
    fn reset_for_retry(&self, id: &Uuid, requested_at: DateTime<Utc>) -> RepoResult<Option<Download>>;

    fn set_post_title(&self, id: &Uuid, post_title: &str) -> RepoResult<Option<Download>>;
}

/// [`JobRepository`] backed by the SQLite [`Database`].
#[derive(Debug, Clone)]
pub struct SqliteJobRepository {
    db: Database,
}

impl SqliteJobRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl JobRepository for SqliteJobRepository {
    fn create(&self, new: NewDownload) -> RepoResult<Download> {
        Ok(download_repo::insert(&self.db, &new)?)
    }

    fn get(&self, id: &Uuid) -> RepoResult<Option<Download>> {
        Ok(download_repo::find_by_id(&self.db, id)?)
    }

    fn list(&self) -> RepoResult<Vec<Download>> {
        Ok(download_repo::list(&self.db)?)
    }

    fn find_active_by_urls(&self, urls: &[String]) -> RepoResult<Option<Download>> {
        Ok(download_repo::find_active_by_urls(&self.db, urls)?)
    }

    fn find_failed_by_urls(&self, urls: &[String]) -> RepoResult<Option<Download>> {
        Ok(download_repo::find_failed_by_urls(&self.db, urls)?)
    }

    fn delete(&self, id: &Uuid) -> RepoResult<bool> {
        Ok(download_repo::delete(&self.db, id)?)
    }

    fn delete_when(&self, id: &Uuid, statuses: &[DownloadStatus]) -> RepoResult<bool> {
        Ok(download_repo::delete_when(&self.db, id, statuses)?)
    }

    fn update_status(
        &self,
        id: &Uuid,
        status: DownloadStatus,
        update: StatusUpdate,
    ) -> RepoResult<Option<Download>> {
        Ok(download_repo::update_status(&self.db, id, status, &update)?)
    }

    fn transition(
        &self,
        id: &Uuid,
        from: &[DownloadStatus],
        to: DownloadStatus,
        update: StatusUpdate,
    ) -> RepoResult<Option<Download>> {
        Ok(download_repo::transition(&self.db, id, from, to, &update)?)
    }

    fn append_items(&self, id: &Uuid, items: &[NewItem]) -> RepoResult<Option<Download>> {
        Ok(download_repo::append_items(&self.db, id, items)?)
    }

    fn complete(
        &self,
        id: &Uuid,
        items: &[NewItem],
        finished_at: DateTime<Utc>,
        output_path: &str,
    ) -> RepoResult<Option<Download>> {
        Ok(download_repo::complete(&self.db, id, items, finished_at, output_path)?)
    }

    fn reset_for_retry(&self, id: &Uuid, requested_at: DateTime<Utc>) -> RepoResult<Option<Download>> {
        Ok(download_repo::reset_for_retry(&self.db, id, requested_at)?)
    }

    fn set_post_title(&self, id: &Uuid, post_title: &str) -> RepoResult<Option<Download>> {
        Ok(download_repo::set_post_title(&self.db, id, post_title)?)
    }
}
