// src/error.rs

//! Error types for the install daemon

use std::path::PathBuf;
use thiserror::Error;

/// Result type for daemon operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while scanning, installing, or persisting state
#[derive(Error, Debug)]
pub enum Error {
    /// State database operation failed
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Bundle manifest missing, empty, or carrying no usable title id
    #[error("manifest missing or invalid under {0}")]
    ManifestNotFound(PathBuf),

    /// Journal line failed its checksum
    #[error("corrupt journal line in {path}: {detail}")]
    CorruptJournal { path: PathBuf, detail: String },

    /// Generic daemon error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a new "other" error with a message
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
