pub mod runtime;
pub mod settings;

pub use runtime::{
    merge, split_args, Defaults, InMemoryOverrides, OverrideSource, RuntimeConfig,
    RuntimeConfigProvider, RuntimeSettingsUpdate, SqliteOverrides,
};
pub use settings::{load_env_file, load_settings, load_settings_from_str, Settings, ENV_FILE, ENV_PREFIX};
