//! Assembles the engine from [`Settings`]: database, repository, runtime
//! overrides, broadcaster, fetcher, runner and worker pool.

use std::sync::Arc;

use log::{info, warn};

use crate::broadcast::NotificationBroadcaster;
use crate::config::{Defaults, RuntimeConfigProvider, Settings, SqliteOverrides};
use crate::db::Database;
use crate::engine::{JobEngine, JobRunner, RecoveryReport, RunnerOptions};
use crate::error::Result;
use crate::fetch::{Fetcher, GalleryDlFetcher};
use crate::jobs::SqliteJobRepository;
use crate::storage::FileSystemStorage;
use crate::worker::{PoolConfig, WorkerPool};

/// A running engine and the pieces callers talk to.
pub struct GalleryService {
    engine: Arc<JobEngine>,
    broadcaster: Arc<NotificationBroadcaster>,
    pool: Arc<WorkerPool>,
    recovery: RecoveryReport,
}

impl std::fmt::Debug for GalleryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GalleryService")
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

impl GalleryService {
    /// Starts the engine with the gallery-dl command from `settings`.
    pub fn start(settings: &Settings) -> Result<Self> {
        let fetcher = GalleryDlFetcher::from_command_line(&settings.gallery_dl_binary)?;
        Self::start_with_fetcher(settings, Arc::new(fetcher))
    }

    /// Starts the engine with a caller-supplied fetcher.
    ///
    /// Jobs left `queued` by a previous process are dispatched again and
    /// jobs left `running` are marked failed.
    pub fn start_with_fetcher(settings: &Settings, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        settings.validate()?;

        let db = Database::open(&settings.database_path)?;
        let repo = Arc::new(SqliteJobRepository::new(db.clone()));
        let runtime = RuntimeConfigProvider::new(
            Defaults::from_settings(settings),
            Arc::new(SqliteOverrides::new(db)),
        );

        let storage_root = runtime.resolve()?.storage_root;
        FileSystemStorage::new(&storage_root).ensure_directory(&storage_root)?;

        if settings.api_token == "changeme" {
            warn!("Using the default API token; set GDL_API_TOKEN");
        }
        let broadcaster = Arc::new(NotificationBroadcaster::new(settings.api_token.clone()));
        broadcaster.start();

        let runner = Arc::new(JobRunner::new(
            repo.clone(),
            fetcher,
            broadcaster.clone(),
            runtime.clone(),
            RunnerOptions {
                fetch_config_path: settings.gallery_dl_config_path.clone(),
            },
        ));
        let pool = Arc::new(WorkerPool::new(
            runner,
            PoolConfig {
                worker_count: settings.worker_concurrency,
                max_attempts: settings.max_attempts,
            },
        )?);

        let engine = Arc::new(JobEngine::new(
            repo,
            pool.clone(),
            broadcaster.clone(),
            runtime,
        ));

        let recovery = match engine.recover() {
            Ok(report) => report,
            Err(e) => {
                pool.shutdown();
                pool.wait();
                broadcaster.stop();
                return Err(e.into());
            }
        };

        info!(
            "galleryd started: storage root {}, {} worker(s)",
            storage_root.display(),
            settings.worker_concurrency
        );

        Ok(Self {
            engine,
            broadcaster,
            pool,
            recovery,
        })
    }

    pub fn engine(&self) -> &Arc<JobEngine> {
        &self.engine
    }

    pub fn broadcaster(&self) -> &Arc<NotificationBroadcaster> {
        &self.broadcaster
    }

    /// The pool behind the engine; its reports can be read from here.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// What startup recovery did.
    pub fn recovery(&self) -> RecoveryReport {
        self.recovery
    }

    /// Finishes queued work, then stops workers and disconnects subscribers.
    pub fn drain(&self) {
        self.pool.wait();
        self.broadcaster.stop();
        info!("galleryd drained");
    }

    /// Stops after in-flight tasks. Tasks still queued stay `queued` in the
    /// store and are picked up by the next start.
    pub fn shutdown(&self) {
        self.pool.shutdown();
        self.pool.wait();
        self.broadcaster.stop();
        info!("galleryd stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SubmitRequest;
    use crate::fetch::{FetchError, FetchRequest, FetchedFile};
    use crate::jobs::{DownloadStatus, JobRepository, NewDownload, StatusUpdate};
    use std::time::Duration;
    use tempfile::TempDir;

    struct OneFileFetcher;

    impl Fetcher for OneFileFetcher {
        fn fetch(&self, request: &FetchRequest) -> std::result::Result<Vec<FetchedFile>, FetchError> {
            let path = request.destination.join("image.png");
            std::fs::write(&path, b"png").unwrap();
            Ok(vec![FetchedFile {
                path,
                relative_path: "image.png".to_string(),
                size: 3,
            }])
        }
    }

    fn settings(temp: &TempDir) -> Settings {
        Settings {
            api_token: "secret".to_string(),
            database_path: temp.path().join("db/galleryd.db"),
            storage_root: temp.path().join("downloads"),
            gallery_dl_config_path: None,
            ..Settings::default()
        }
    }

    #[test]
    fn test_start_creates_storage_root() {
        let temp = TempDir::new().unwrap();
        let settings = settings(&temp);
        let service = GalleryService::start_with_fetcher(&settings, Arc::new(OneFileFetcher)).unwrap();

        assert!(settings.storage_root.is_dir());
        assert!(service.broadcaster().is_running());
        assert_eq!(service.recovery(), RecoveryReport::default());
        service.shutdown();
        assert!(!service.broadcaster().is_running());
    }

    #[test]
    fn test_submit_runs_through_pool() {
        let temp = TempDir::new().unwrap();
        let service =
            GalleryService::start_with_fetcher(&settings(&temp), Arc::new(OneFileFetcher)).unwrap();

        let outcome = service
            .engine()
            .submit(SubmitRequest::new(["https://example.com/gallery/1"]))
            .unwrap();
        let id = outcome.download().id;

        let report = service
            .pool()
            .recv_report_timeout(Duration::from_secs(10))
            .unwrap();
        assert_eq!(report.download_id, id);
        assert!(report.is_success());

        let done = service.engine().get(&id).unwrap();
        assert_eq!(done.status, DownloadStatus::Succeeded);
        assert_eq!(done.items.len(), 1);
        service.shutdown();
    }

    #[test]
    fn test_start_recovers_leftover_jobs() {
        let temp = TempDir::new().unwrap();
        let settings = settings(&temp);

        let (running_id, queued_id) = {
            let repo = SqliteJobRepository::new(Database::open(&settings.database_path).unwrap());
            let running = repo
                .create(NewDownload::new(vec!["https://example.com/a".to_string()], None, None))
                .unwrap();
            repo.update_status(
                &running.id,
                DownloadStatus::Running,
                StatusUpdate::started(chrono::Utc::now()),
            )
            .unwrap();
            let queued = repo
                .create(NewDownload::new(vec!["https://example.com/b".to_string()], None, None))
                .unwrap();
            (running.id, queued.id)
        };

        let service = GalleryService::start_with_fetcher(&settings, Arc::new(OneFileFetcher)).unwrap();
        assert_eq!(
            service.recovery(),
            RecoveryReport {
                requeued: 1,
                interrupted: 1
            }
        );

        let interrupted = service.engine().get(&running_id).unwrap();
        assert_eq!(interrupted.status, DownloadStatus::Failed);
        assert_eq!(
            interrupted.failure_reason.as_deref(),
            Some("Interrupted before completion")
        );

        service.drain();
        assert_eq!(
            service.engine().get(&queued_id).unwrap().status,
            DownloadStatus::Succeeded
        );
    }

    #[test]
    fn test_start_rejects_invalid_settings() {
        let temp = TempDir::new().unwrap();
        let settings = Settings {
            worker_concurrency: 0,
            ..settings(&temp)
        };
        assert!(GalleryService::start_with_fetcher(&settings, Arc::new(OneFileFetcher)).is_err());
    }
}
