/// Errors that can occur within the registry and liveness stores.
///
/// # Examples
///
/// ```rust
/// use fleetmon_storage::error::StorageError;
///
/// let err = StorageError::InvalidTimestamp {
///     column: "last_collected_at",
///     value: i64::MAX,
/// };
/// assert!(err.to_string().contains("last_collected_at"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An underlying SQLite error.
    #[error("Storage: SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the database directory failed.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A millisecond timestamp column held a value outside the representable range.
    #[error("Storage: invalid timestamp in column '{column}': {value}")]
    InvalidTimestamp { column: &'static str, value: i64 },
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
