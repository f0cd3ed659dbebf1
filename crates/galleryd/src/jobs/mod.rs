//! Download jobs: the record model and the store the engine persists them in.

pub mod model;
pub mod repository;

pub use model::{
    Download, DownloadItem, DownloadStatus, NewDownload, NewItem, ParseStatusError, StatusUpdate,
};
pub use repository::{JobRepository, RepoResult, RepositoryError, SqliteJobRepository};
