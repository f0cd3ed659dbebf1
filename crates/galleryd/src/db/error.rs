use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Cannot prepare database directory '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Schema upgrade to v{version} failed: {reason}")]
    Migration { version: u32, reason: String },

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt value in column '{column}': {reason}")]
    Corrupt { column: &'static str, reason: String },

    /// A UNIQUE column already holds this value.
    #[error("Duplicate value for '{column}': {value}")]
    Duplicate { column: &'static str, value: String },

    /// A thread panicked while holding the connection.
    #[error("Database connection poisoned")]
    LockPoisoned,
}

impl DatabaseError {
    /// UNIQUE or PRIMARY KEY constraint hit.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DatabaseError::Duplicate { .. } => true,
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => {
                err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
            }
            _ => false,
        }
    }
}
