//! Store error types.

use thiserror::Error;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by the persistence layer.
///
/// Callers treat every variant as non-fatal: the state machine keeps
/// running in memory and the next server sync restores consistency.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not open or create the backing database.
    #[error("store connection failed: {0}")]
    ConnectionFailed(String),

    /// Schema migration failed.
    #[error("store migration failed: {0}")]
    MigrationFailed(String),

    /// A read or write query failed.
    #[error("store query failed: {0}")]
    QueryFailed(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::QueryFailed(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::MigrationFailed(err.to_string())
    }
}
