//! Error types for the indexing pipeline.
//!
//! [`IndexError`] is what library callers see. Store backends report
//! [`StoreError`], which converts into [`IndexError::Storage`].

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to extract chunks from {path}: {message}")]
    Extraction { path: String, message: String },

    #[error("failed to checksum {}: {source}", path.display())]
    Checksum {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store is not initialized")]
    NotInitialized,

    #[error("migration {version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("corrupted {what}: {message}")]
    Corruption { what: String, message: String },

    #[error("embedding dimension mismatch: index is pinned to {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("backup error: {0}")]
    Backup(String),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("remote store error: {0}")]
    Remote(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub(crate) fn corruption(what: impl Into<String>, message: impl ToString) -> Self {
        StoreError::Corruption {
            what: what.into(),
            message: message.to_string(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Remote(err.to_string())
    }
}
