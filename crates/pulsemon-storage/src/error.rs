use pulsemon_common::retry::Retryable;

/// Errors surfaced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Lookup of an id the store has never seen.
    #[error("metric not found (id={0})")]
    NotFound(String),

    /// An underlying SQLite error.
    #[error("storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Snapshot serialization or deserialization failure.
    #[error("storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot file I/O failure.
    #[error("storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored row violates the metric model (e.g. unknown type text).
    #[error("storage: {0}")]
    Corrupt(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

impl Retryable for StorageError {
    /// Only the backend's transient fault family is worth a retry: busy and
    /// locked database handles. Not-found, validation and snapshot I/O
    /// failures are final.
    fn is_transient(&self) -> bool {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}
