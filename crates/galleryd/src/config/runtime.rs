//! Effective runtime configuration: persisted overrides layered on static
//! settings, resolved each time a job is enqueued or executed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::settings::Settings;
use crate::db::{settings_repo, Database};
use crate::error::ConfigError;

pub const KEY_STORAGE_ROOT: &str = "storage_root";
pub const KEY_EXTRA_ARGS: &str = "gallery_dl_extra_args";
pub const KEY_JOB_TIMEOUT: &str = "job_timeout_seconds";

/// Static fallbacks for every overridable setting.
#[derive(Debug, Clone, PartialEq)]
pub struct Defaults {
    pub storage_root: PathBuf,
    pub extra_fetch_args: Option<String>,
    /// `None` means no timeout.
    pub job_timeout_seconds: Option<u64>,
}

impl Defaults {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            storage_root: settings.storage_root.clone(),
            extra_fetch_args: settings.gallery_dl_extra_args.clone(),
            job_timeout_seconds: match settings.job_timeout_seconds {
                0 => None,
                secs => Some(secs),
            },
        }
    }
}

/// Resolved settings as seen by a single job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Absolute, with `~` expanded.
    pub storage_root: PathBuf,
    pub extra_fetch_args: Option<String>,
    pub job_timeout_seconds: Option<u64>,
}

impl RuntimeConfig {
    /// Extra fetch arguments split shell-style.
    pub fn extra_args(&self) -> Result<Vec<String>, ConfigError> {
        match self.extra_fetch_args.as_deref() {
            Some(raw) => split_args(raw),
            None => Ok(Vec::new()),
        }
    }

    pub fn job_timeout(&self) -> Option<Duration> {
        self.job_timeout_seconds.map(Duration::from_secs)
    }
}

/// Partial update of the persisted overrides. `None` leaves a key as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettingsUpdate {
    #[serde(default)]
    pub storage_root: Option<String>,
    #[serde(default)]
    pub extra_fetch_args: Option<String>,
    #[serde(default)]
    pub job_timeout_seconds: Option<u64>,
}

impl RuntimeSettingsUpdate {
    fn entries(&self) -> Vec<(&'static str, Option<String>)> {
        let mut entries = Vec::new();
        if let Some(root) = &self.storage_root {
            entries.push((KEY_STORAGE_ROOT, Some(root.clone())));
        }
        if let Some(args) = &self.extra_fetch_args {
            entries.push((KEY_EXTRA_ARGS, Some(args.clone())));
        }
        if let Some(secs) = self.job_timeout_seconds {
            entries.push((KEY_JOB_TIMEOUT, Some(secs.to_string())));
        }
        entries
    }
}

/// A flat key/value store of overrides.
pub trait OverrideSource: Send + Sync {
    /// All stored overrides. Missing keys are simply absent.
    fn load(&self) -> Result<HashMap<String, Option<String>>, ConfigError>;

    fn store(&self, entries: &[(&str, Option<String>)]) -> Result<(), ConfigError>;
}

/// Overrides persisted in the `runtime_settings` table.
#[derive(Debug, Clone)]
pub struct SqliteOverrides {
    db: Database,
}

impl SqliteOverrides {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl OverrideSource for SqliteOverrides {
    fn load(&self) -> Result<HashMap<String, Option<String>>, ConfigError> {
        Ok(settings_repo::all(&self.db)?)
    }

    fn store(&self, entries: &[(&str, Option<String>)]) -> Result<(), ConfigError> {
        Ok(settings_repo::bulk_update(&self.db, entries)?)
    }
}

/// Process-local overrides, mostly for tests.
#[derive(Debug, Default)]
pub struct InMemoryOverrides {
    values: Mutex<HashMap<String, Option<String>>>,
}

impl InMemoryOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.into(), Some(v.into())))
            .collect();
        Self {
            values: Mutex::new(map),
        }
    }
}

impl OverrideSource for InMemoryOverrides {
    fn load(&self) -> Result<HashMap<String, Option<String>>, ConfigError> {
        let values = self.values.lock().map_err(|_| ConfigError::Validation {
            message: "override map lock poisoned".to_string(),
        })?;
        Ok(values.clone())
    }

    fn store(&self, entries: &[(&str, Option<String>)]) -> Result<(), ConfigError> {
        let mut values = self.values.lock().map_err(|_| ConfigError::Validation {
            message: "override map lock poisoned".to_string(),
        })?;
        for (key, value) in entries {
            values.insert(key.to_string(), value.clone());
        }
        Ok(())
    }
}

/// Layers `overrides` on `defaults`.
///
/// Empty or absent values fall through to the default. A timeout of `0`
/// disables it; a timeout that is not a non-negative integer falls back to
/// the default and is logged.
pub fn merge(
    defaults: &Defaults,
    overrides: &HashMap<String, Option<String>>,
) -> Result<RuntimeConfig, ConfigError> {
    let lookup = |key: &str| {
        overrides
            .get(key)
            .and_then(|v| v.as_deref())
            .filter(|v| !v.is_empty())
    };

    let storage_root = match lookup(KEY_STORAGE_ROOT) {
        Some(root) => PathBuf::from(root),
        None => defaults.storage_root.clone(),
    };

    let extra_fetch_args = lookup(KEY_EXTRA_ARGS)
        .map(str::to_string)
        .or_else(|| defaults.extra_fetch_args.clone());

    let job_timeout_seconds = match lookup(KEY_JOB_TIMEOUT) {
        None => defaults.job_timeout_seconds,
        Some(raw) => match raw.trim().parse::<u64>() {
            Ok(0) => None,
            Ok(secs) => Some(secs),
            Err(e) => {
                log::warn!(
                    "Ignoring invalid {} override '{}': {}",
                    KEY_JOB_TIMEOUT,
                    raw,
                    e
                );
                defaults.job_timeout_seconds
            }
        },
    };

    Ok(RuntimeConfig {
        storage_root: resolve_path(&storage_root)?,
        extra_fetch_args,
        job_timeout_seconds,
    })
}

/// Expands a leading `~` and makes the path absolute.
fn resolve_path(path: &Path) -> Result<PathBuf, ConfigError> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    };

    std::path::absolute(&expanded).map_err(|e| ConfigError::StorageRoot {
        path: expanded.clone(),
        source: e,
    })
}

/// Splits a command-line fragment into words with POSIX shell quoting and
/// no expansion.
pub fn split_args(input: &str) -> Result<Vec<String>, ConfigError> {
    shlex::split(input).ok_or_else(|| ConfigError::InvalidValue {
        key: KEY_EXTRA_ARGS.to_string(),
        reason: format!("unbalanced quoting in '{}'", input),
    })
}

/// Resolves [`RuntimeConfig`] against a swappable [`OverrideSource`].
#[derive(Clone)]
pub struct RuntimeConfigProvider {
    defaults: Defaults,
    source: Arc<dyn OverrideSource>,
}

impl std::fmt::Debug for RuntimeConfigProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfigProvider")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl RuntimeConfigProvider {
    pub fn new(defaults: Defaults, source: Arc<dyn OverrideSource>) -> Self {
        Self { defaults, source }
    }

    pub fn defaults(&self) -> &Defaults {
        &self.defaults
    }

    pub fn resolve(&self) -> Result<RuntimeConfig, ConfigError> {
        let overrides = self.source.load()?;
        merge(&self.defaults, &overrides)
    }

    /// Persists the provided overrides and returns the new effective config.
    pub fn update(&self, update: &RuntimeSettingsUpdate) -> Result<RuntimeConfig, ConfigError> {
        let entries = update.entries();
        if !entries.is_empty() {
            let borrowed: Vec<(&str, Option<String>)> =
                entries.iter().map(|(k, v)| (*k, v.clone())).collect();
            self.source.store(&borrowed)?;
            log::info!("Updated {} runtime setting(s)", entries.len());
        }
        self.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Defaults {
        Defaults {
            storage_root: PathBuf::from("/data/downloads"),
            extra_fetch_args: Some("--no-mtime".to_string()),
            job_timeout_seconds: Some(1800),
        }
    }

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, Option<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Some(v.to_string())))
            .collect()
    }

    #[test]
    fn test_merge_without_overrides_uses_defaults() {
        let config = merge(&defaults(), &HashMap::new()).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/data/downloads"));
        assert_eq!(config.extra_fetch_args.as_deref(), Some("--no-mtime"));
        assert_eq!(config.job_timeout(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn test_merge_timeout_rules() {
        let d = defaults();
        let zero = merge(&d, &overrides(&[(KEY_JOB_TIMEOUT, "0")])).unwrap();
        assert_eq!(zero.job_timeout_seconds, None);

        let empty = merge(&d, &overrides(&[(KEY_JOB_TIMEOUT, "")])).unwrap();
        assert_eq!(empty.job_timeout_seconds, Some(1800));

        let garbage = merge(&d, &overrides(&[(KEY_JOB_TIMEOUT, "soon")])).unwrap();
        assert_eq!(garbage.job_timeout_seconds, Some(1800));

        let set = merge(&d, &overrides(&[(KEY_JOB_TIMEOUT, "60")])).unwrap();
        assert_eq!(set.job_timeout_seconds, Some(60));
    }

    #[test]
    fn test_merge_null_value_falls_through() {
        let mut map = HashMap::new();
        map.insert(KEY_STORAGE_ROOT.to_string(), None);
        let config = merge(&defaults(), &map).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/data/downloads"));
    }

    #[test]
    fn test_merge_expands_home_and_makes_absolute() {
        let config = merge(&defaults(), &overrides(&[(KEY_STORAGE_ROOT, "~/gallery")])).unwrap();
        let home = dirs::home_dir().unwrap();
        assert_eq!(config.storage_root, home.join("gallery"));

        let relative = merge(&defaults(), &overrides(&[(KEY_STORAGE_ROOT, "media")])).unwrap();
        assert!(relative.storage_root.is_absolute());
        assert!(relative.storage_root.ends_with("media"));
    }

    #[test]
    fn test_split_args() {
        assert_eq!(split_args("").unwrap(), Vec::<String>::new());
        assert_eq!(
            split_args("--range 1-5  --no-mtime").unwrap(),
            vec!["--range", "1-5", "--no-mtime"]
        );
        assert_eq!(
            split_args(r#"-o "base-directory=/my files" --filter 'width > 100'"#).unwrap(),
            vec!["-o", "base-directory=/my files", "--filter", "width > 100"]
        );
        assert_eq!(split_args(r"a\ b c").unwrap(), vec!["a b", "c"]);
        assert_eq!(split_args(r#""say \"hi\"""#).unwrap(), vec![r#"say "hi""#]);
    }

    #[test]
    fn test_split_args_unterminated() {
        assert!(split_args("'open").is_err());
        assert!(split_args("\"open").is_err());
    }

    #[test]
    fn test_provider_update_is_partial() {
        let source = Arc::new(InMemoryOverrides::with_values([(KEY_JOB_TIMEOUT, "90")]));
        let provider = RuntimeConfigProvider::new(defaults(), source);

        let updated = provider
            .update(&RuntimeSettingsUpdate {
                storage_root: Some("/srv/gallery".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.storage_root, PathBuf::from("/srv/gallery"));
        assert_eq!(updated.job_timeout_seconds, Some(90));

        let updated = provider
            .update(&RuntimeSettingsUpdate {
                job_timeout_seconds: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.job_timeout_seconds, None);
        assert_eq!(updated.storage_root, PathBuf::from("/srv/gallery"));
    }

    #[test]
    fn test_sqlite_overrides() {
        let db = Database::open_in_memory().unwrap();
        let provider = RuntimeConfigProvider::new(defaults(), Arc::new(SqliteOverrides::new(db.clone())));
        provider
            .update(&RuntimeSettingsUpdate {
                extra_fetch_args: Some("--sleep 2".to_string()),
                ..Default::default()
            })
            .unwrap();

        let config = provider.resolve().unwrap();
        assert_eq!(config.extra_args().unwrap(), vec!["--sleep", "2"]);
        assert_eq!(
            settings_repo::get(&db, KEY_EXTRA_ARGS).unwrap().as_deref(),
            Some("--sleep 2")
        );
    }

    #[test]
    fn test_defaults_from_settings_zero_timeout() {
        let settings = Settings {
            job_timeout_seconds: 0,
            ..Settings::default()
        };
        assert_eq!(Defaults::from_settings(&settings).job_timeout_seconds, None);
    }
}
