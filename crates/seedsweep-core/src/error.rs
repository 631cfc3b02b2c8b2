use std::path::PathBuf;

use thiserror::Error;

use crate::storage::models::{FileStatus, Source};

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A single file could not be opened, stat'ed or read. Callers skip the
    /// file and keep going.
    #[error("cannot read {}: {source}", path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("remote daemon unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("run cancelled before {stage}")]
    Cancelled { stage: &'static str },

    #[error("{path} ({category}) cannot go from {from} to {to}")]
    InvalidTransition {
        path: String,
        category: Source,
        from: FileStatus,
        to: FileStatus,
    },

    #[error("{path} ({category}) is not tracked")]
    NotTracked { path: String, category: Source },

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn file_access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::FileAccess {
            path: path.into(),
            source,
        }
    }

    /// True for errors that abort a whole run rather than a single file.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::FileAccess { .. })
    }
}
