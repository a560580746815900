use thiserror::Error;

use crate::models::TimerStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),
    #[error("stored value for '{key}' is unreadable: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

#[derive(Debug, Error)]
pub enum LockError {
    /// The runtime has no usable lock service; callers fall back to degraded mode.
    #[error("lock service unavailable: {0}")]
    Unavailable(String),
    #[error("lock I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("playback resource is not ready")]
    NotReady,
    #[error("unknown track '{0}'")]
    UnknownTrack(String),
    #[error("failed to load track '{track}': {reason}")]
    Load { track: String, reason: String },
    #[error("playback engine error: {0}")]
    Engine(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("cannot {op} while timer is {}", status.as_str())]
    InvalidTransition { op: &'static str, status: TimerStatus },
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("track '{0}' is a built-in default and cannot be removed")]
    CannotRemoveDefault(String),
    #[error("track '{0}' already exists")]
    Duplicate(String),
    #[error("track '{0}' not found")]
    NotFound(String),
}
