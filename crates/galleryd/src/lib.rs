pub mod broadcast;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod logging;
pub mod service;
pub mod storage;
pub mod worker;

pub use broadcast::{extract_token, NotificationBroadcaster, NotificationEvent, Subscription};
pub use config::{load_settings, RuntimeConfig, RuntimeSettingsUpdate, Settings};
pub use engine::{EngineError, JobEngine, RunError, SubmitOutcome, SubmitRequest};
pub use error::{ConfigError, GalleryError, Result, StorageError, WorkerError};
pub use fetch::{FetchError, Fetcher, GalleryDlFetcher};
pub use jobs::{Download, DownloadItem, DownloadStatus};
pub use logging::LogFormat;
pub use service::GalleryService;
