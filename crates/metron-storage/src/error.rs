use metron_common::error::WireError;
use metron_common::types::MetricType;

/// Errors surfaced by every storage back-end.
///
/// # Examples
///
/// ```rust
/// use metron_storage::error::StorageError;
///
/// let err = StorageError::NotExist;
/// assert!(err.is_not_found());
/// assert_eq!(err.to_string(), "Storage: metric does not exist");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested metric has never been written.
    #[error("Storage: metric does not exist")]
    NotExist,

    /// The SQL back-end has been closed.
    #[error("Storage: no database connected")]
    NoDbConnected,

    /// The operation only makes sense for the in-memory back-end.
    #[error("Storage: not in memory mode")]
    NotMemMode,

    /// A name is already stored under the other metric type.
    #[error("Storage: metric {name} is already stored as {existing}")]
    TypeConflict { name: String, existing: MetricType },

    /// A record failed wire-level validation.
    #[error("Storage: invalid metric: {0}")]
    Invalid(#[from] WireError),

    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotExist)
    }

    /// Errors caused by the caller's input rather than the back-end.
    pub fn is_bad_input(&self) -> bool {
        match self {
            StorageError::TypeConflict { .. } => true,
            StorageError::Invalid(e) => e.is_bad_input(),
            _ => false,
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
