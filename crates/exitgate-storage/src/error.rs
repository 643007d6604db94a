use thiserror::Error;

/// Errors returned by the transaction store.
///
/// Transport failures (closed or exhausted pool, I/O, deadline exceeded) are
/// classified as [`StoreError::Unavailable`] so callers can tell a lost
/// backend apart from a failed statement.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Document does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Revision presented by the writer is stale
    #[error("Revision conflict on {id}: expected {expected}, found {actual}")]
    Conflict {
        id: String,
        expected: String,
        actual: String,
    },

    /// Backend unreachable or deadline exceeded
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Insert collides with an existing id or an OPEN record
    #[error("Duplicate document: {0}")]
    Duplicate(String),

    /// Mutator or invariant check refused the change
    #[error("Change rejected: {0}")]
    Rejected(#[from] exitgate_core::Error),

    /// Stored body cannot be decoded
    #[error("Corrupt document {id}: {message}")]
    Corrupt { id: String, message: String },

    /// Statement failed
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Migration execution failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_) => Self::Unavailable(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::Duplicate(db.message().to_string())
            }
            other => Self::Database(other),
        }
    }
}

/// Specialized result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
