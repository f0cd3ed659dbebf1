//! Fetch executor: runs the external gallery fetcher against a destination
//! and reports the files it left there.

pub mod gallery_dl;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::error::StorageError;

pub use gallery_dl::GalleryDlFetcher;

/// One fetch invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Existing directory the fetcher writes into.
    pub destination: PathBuf,
    pub urls: Vec<String>,
    pub extra_args: Vec<String>,
    /// Passed to the fetcher only when the file exists.
    pub config_path: Option<PathBuf>,
    /// The process is killed once this elapses.
    pub timeout: Option<Duration>,
}

/// A regular file found under the destination after a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub path: PathBuf,
    /// Relative to [`FetchRequest::destination`], `/`-separated.
    pub relative_path: String,
    pub size: u64,
}

impl FetchedFile {
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.relative_path.clone())
    }
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Fetch process failed with {}{}", describe_code(.code), describe_stderr(.stderr))]
    ProcessFailed { code: Option<i32>, stderr: String },

    #[error("Fetch process timed out after {} seconds", .after.as_secs())]
    TimedOut { after: Duration },

    #[error("Failed to wait for fetch process: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to scan fetch output: {0}")]
    Scan(#[from] StorageError),

    #[error("Failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

fn describe_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

/// Something that can fetch a set of URLs into a directory.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<FetchedFile>, FetchError>;
}
