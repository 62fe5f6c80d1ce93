// ABOUTME: Error type shared by the collection store and the layers built on it.
// ABOUTME: Initialization failures are sticky and wrap the original cause.

use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    #[error("unknown index '{index}' on collection '{collection}'")]
    UnknownIndex { collection: String, index: String },

    #[error("record in '{collection}' has no usable key at '{key_path}'")]
    MissingKey { collection: String, key_path: String },

    #[error("database is at schema version {stored}, newer than requested version {requested}")]
    VersionDowngrade { stored: u32, requested: u32 },

    #[error("store failed to initialize: {0}")]
    Init(Arc<StoreError>),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("write-behind worker is no longer running")]
    WorkerStopped,
}
