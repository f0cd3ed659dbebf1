use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("Settings: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage: {0}")]
    Storage(#[from] StorageError),

    #[error("Workers: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Job store: {0}")]
    Repository(#[from] crate::jobs::RepositoryError),

    #[error("Fetch: {0}")]
    Fetch(#[from] crate::fetch::FetchError),

    #[error(transparent)]
    Engine(#[from] crate::engine::EngineError),

    #[error(transparent)]
    Run(#[from] crate::engine::RunError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Settings file is not valid JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Cannot load env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error("Invalid settings: {message}")]
    Validation { message: String },

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to resolve storage root '{path}': {source}")]
    StorageRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read runtime overrides: {0}")]
    Overrides(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Cannot create download folder '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot list downloaded files in '{path}': {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Path '{path}' is outside of '{root}'")]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Cannot start download worker: {0}")]
    SpawnFailed(String),

    #[error("Download queue is closed")]
    ChannelClosed,

    #[error("Download workers are shutting down")]
    ShuttingDown,
}

pub type Result<T> = std::result::Result<T, GalleryError>;
