//! Isolated engine over a temp directory.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use galleryd::broadcast::{NotificationBroadcaster, Subscription};
use galleryd::config::{Defaults, RuntimeConfigProvider, SqliteOverrides};
use galleryd::db::Database;
use galleryd::engine::{JobEngine, JobRunner, RunError, RunnerOptions};
use galleryd::fetch::Fetcher;
use galleryd::jobs::{Download, JobRepository, SqliteJobRepository};

use super::fakes::RecordingDispatcher;

pub const API_TOKEN: &str = "test-token";

/// Engine, repository and broadcaster sharing one temp database, with
/// dispatch captured by a [`RecordingDispatcher`].
pub struct TestHarness {
    temp_dir: TempDir,
    pub storage_root: PathBuf,
    pub db: Database,
    pub repo: Arc<SqliteJobRepository>,
    pub broadcaster: Arc<NotificationBroadcaster>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub runtime: RuntimeConfigProvider,
    pub engine: JobEngine,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let storage_root = temp_dir.path().join("downloads");
        std::fs::create_dir_all(&storage_root).expect("Failed to create storage root");

        let db = Database::open(&temp_dir.path().join("galleryd.db")).expect("Failed to open database");
        let repo = Arc::new(SqliteJobRepository::new(db.clone()));
        let broadcaster = Arc::new(NotificationBroadcaster::new(API_TOKEN));
        broadcaster.start();
        let dispatcher = Arc::new(RecordingDispatcher::new());

        let runtime = RuntimeConfigProvider::new(
            Defaults {
                storage_root: storage_root.clone(),
                extra_fetch_args: None,
                job_timeout_seconds: Some(1800),
            },
            Arc::new(SqliteOverrides::new(db.clone())),
        );

        let engine = JobEngine::new(
            repo.clone(),
            dispatcher.clone(),
            broadcaster.clone(),
            runtime.clone(),
        );

        Self {
            temp_dir,
            storage_root,
            db,
            repo,
            broadcaster,
            dispatcher,
            runtime,
            engine,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A second engine sharing this harness's dispatcher, broadcaster and
    /// settings, over `repo`.
    pub fn engine_over(&self, repo: Arc<dyn JobRepository>) -> JobEngine {
        JobEngine::new(
            repo,
            self.dispatcher.clone(),
            self.broadcaster.clone(),
            self.runtime.clone(),
        )
    }

    pub fn runner(&self, fetcher: Arc<dyn Fetcher>) -> JobRunner {
        JobRunner::new(
            self.repo.clone(),
            fetcher,
            self.broadcaster.clone(),
            self.runtime.clone(),
            RunnerOptions::default(),
        )
    }

    /// Runs every task dispatched so far, in order, with `fetcher`.
    pub fn run_dispatched(&self, fetcher: Arc<dyn Fetcher>) -> Vec<Result<Download, RunError>> {
        let runner = self.runner(fetcher);
        self.dispatcher
            .take()
            .iter()
            .map(|task| runner.run(task))
            .collect()
    }

    pub fn subscribe(&self) -> Subscription {
        self.broadcaster
            .subscribe_with_token(API_TOKEN)
            .expect("Failed to subscribe")
    }
}

/// Every frame buffered on `subscription`, parsed.
pub fn drain_frames(subscription: &mut Subscription) -> Vec<serde_json::Value> {
    std::iter::from_fn(|| subscription.receiver.try_recv().ok())
        .map(|frame| serde_json::from_str(&frame).expect("Frame is not JSON"))
        .collect()
}

/// The `type` of every buffered frame after the welcome frame.
pub fn drain_event_kinds(subscription: &mut Subscription) -> Vec<String> {
    drain_frames(subscription)
        .into_iter()
        .filter(|frame| frame["type"] != "welcome")
        .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
        .collect()
}
