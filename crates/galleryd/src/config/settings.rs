use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogFormat;

/// Prefix of every environment variable [`Settings::from_env`] reads.
pub const ENV_PREFIX: &str = "GDL_";

/// Dotenv file [`Settings::from_env`] looks for.
pub const ENV_FILE: &str = ".env";

/// Static process settings. Runtime overrides are layered on top of a
/// subset of these by [`crate::config::RuntimeConfigProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Shared secret notification subscribers must present.
    #[serde(default = "default_api_token")]
    pub api_token: String,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,
    #[serde(default = "default_gallery_dl_binary")]
    pub gallery_dl_binary: String,
    /// Passed as `--config` only when the file exists.
    #[serde(default = "default_gallery_dl_config_path")]
    pub gallery_dl_config_path: Option<PathBuf>,
    #[serde(default)]
    pub gallery_dl_extra_args: Option<String>,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,
    /// `0` disables the timeout.
    #[serde(default = "default_job_timeout_seconds")]
    pub job_timeout_seconds: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_api_token() -> String {
    "changeme".to_string()
}

fn default_database_path() -> PathBuf {
    crate::db::default_database_path().unwrap_or_else(|| PathBuf::from("./data/galleryd.db"))
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/data/downloads")
}

fn default_gallery_dl_binary() -> String {
    "gallery-dl".to_string()
}

fn default_gallery_dl_config_path() -> Option<PathBuf> {
    Some(PathBuf::from("/etc/gallery-dl/config.json"))
}

fn default_worker_concurrency() -> usize {
    1
}

fn default_job_timeout_seconds() -> u64 {
    1800
}

fn default_max_attempts() -> u32 {
    1
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_token: default_api_token(),
            database_path: default_database_path(),
            storage_root: default_storage_root(),
            gallery_dl_binary: default_gallery_dl_binary(),
            gallery_dl_config_path: default_gallery_dl_config_path(),
            gallery_dl_extra_args: None,
            worker_concurrency: default_worker_concurrency(),
            job_timeout_seconds: default_job_timeout_seconds(),
            max_attempts: default_max_attempts(),
            log_format: LogFormat::default(),
        }
    }
}

impl Settings {
    /// Defaults overlaid with `GDL_*` environment variables, after loading
    /// `.env` from the working directory or a parent if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_env_file(None)?;
        Self::from_process_env()
    }

    /// [`from_env`](Self::from_env) with an explicit dotenv file. A missing
    /// file is skipped.
    pub fn from_env_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        load_env_file(Some(path.as_ref()))?;
        Self::from_process_env()
    }

    fn from_process_env() -> Result<Self, ConfigError> {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, which is handed full
    /// variable names such as `GDL_STORAGE_ROOT`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::default().overlay(lookup)
    }

    /// Overlays prefixed variables onto `self`. Unset variables leave the
    /// current value; an empty `GDL_GALLERY_DL_CONFIG_PATH` or
    /// `GDL_GALLERY_DL_EXTRA_ARGS` clears it.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = get("API_TOKEN") {
            self.api_token = v;
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = get("STORAGE_ROOT") {
            self.storage_root = PathBuf::from(v);
        }
        if let Some(v) = get("GALLERY_DL_BINARY") {
            self.gallery_dl_binary = v;
        }
        if let Some(v) = get("GALLERY_DL_CONFIG_PATH") {
            self.gallery_dl_config_path = non_empty(v).map(PathBuf::from);
        }
        if let Some(v) = get("GALLERY_DL_EXTRA_ARGS") {
            self.gallery_dl_extra_args = non_empty(v);
        }
        if let Some(v) = get("WORKER_CONCURRENCY") {
            self.worker_concurrency = parse_number("worker_concurrency", &v)?;
        }
        if let Some(v) = get("JOB_TIMEOUT_SECONDS") {
            self.job_timeout_seconds = parse_number("job_timeout_seconds", &v)?;
        }
        if let Some(v) = get("MAX_ATTEMPTS") {
            self.max_attempts = parse_number("max_attempts", &v)?;
        }
        if let Some(v) = get("LOG_FORMAT") {
            self.log_format = v.parse().map_err(|reason| ConfigError::InvalidValue {
                key: "log_format".to_string(),
                reason,
            })?;
        }

        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_concurrency == 0 {
            return Err(ConfigError::Validation {
                message: "worker_concurrency must be at least 1".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_attempts must be at least 1".to_string(),
            });
        }
        if self.gallery_dl_binary.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: "gallery_dl_binary must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Copies a dotenv file into the process environment. Variables that are
/// already set keep their value. Returns whether a file was read.
pub fn load_env_file(path: Option<&Path>) -> Result<bool, ConfigError> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path),
        None => dotenvy::from_filename(ENV_FILE).map(|_| ()),
    };
    match loaded {
        Ok(()) => {
            let name = path.map_or_else(|| ENV_FILE.to_string(), |p| p.display().to_string());
            log::debug!("Loaded environment from {}", name);
            Ok(true)
        }
        Err(dotenvy::Error::Io(_)) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: format!("'{}': {}", value, e),
    })
}

/// Reads settings from a JSON file. Missing fields take their defaults.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_settings_from_str(&content)
}

pub fn load_settings_from_str(content: &str) -> Result<Settings, ConfigError> {
    let settings: Settings = serde_json::from_str(content)?;
    settings.validate()?;
    Ok(settings)
}
