//! PostgreSQL backing for the stratus inventory.
//!
//! [`ConnectionManager`] owns the live [`sqlx::PgPool`] and hot-swaps it
//! when a configuration reload resolves to a different connection string,
//! draining the old pool only after a grace period. [`PgStorage`] is the
//! production implementation of the storage traits the versioning engine
//! runs against.

pub mod manager;
pub mod storage;

pub use manager::ConnectionManager;
pub use storage::PgStorage;

/// Errors from connection management.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Opening a pool failed.
    #[error("failed to open database connection: {0}")]
    Open(#[source] sqlx::Error),
}

/// Result type for connection management.
pub type DbResult<T> = Result<T, DbError>;
