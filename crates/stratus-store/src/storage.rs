//! Storage backend seam.
//!
//! The engine speaks to storage exclusively through these traits: begin a
//! transaction, operate on current/history rows, then commit or roll
//! back. Every mutation of one reconcile batch goes through a single
//! transaction object, so atomicity is the backend's native transaction
//! atomicity. Dropping an uncommitted transaction must roll it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stratus_core::{ChildItem, Scope};

use crate::model::StoredRecord;

/// Errors returned by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend rejected or failed an operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A row or document could not be (de)serialized.
    #[error("storage serialization error: {0}")]
    Serialization(String),
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A transactional storage backend.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Transaction type of this backend.
    type Tx: StorageTx;

    /// Begin a transaction.
    async fn begin(&self) -> StoreResult<Self::Tx>;
}

/// One open transaction.
///
/// All row operations are scoped by (kind, scope) plus the resource
/// identifier; history operations touch only open rows
/// (`valid_to IS NULL`).
#[async_trait]
pub trait StorageTx: Send {
    /// Point lookup of the current row, children eagerly loaded.
    async fn load_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<Option<StoredRecord>>;

    /// Insert or fully rewrite the current row.
    async fn upsert_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        record: &StoredRecord,
    ) -> StoreResult<()>;

    /// Advance only `collected_at` (the write-skip path).
    async fn update_collected_at(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collected_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Delete the current row.
    async fn delete_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<()>;

    /// Replace one child collection's rows wholesale.
    async fn replace_children(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collection: &str,
        items: &[ChildItem],
    ) -> StoreResult<()>;

    /// Delete every child row of the resource.
    async fn delete_children(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<()>;

    /// Open a history interval starting at `valid_from`.
    async fn open_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        record: &StoredRecord,
        valid_from: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Close the open history interval, if any, at `valid_to`.
    async fn close_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        valid_to: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Open a child-history interval carrying the collection snapshot.
    async fn open_child_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collection: &str,
        items: &[ChildItem],
        valid_from: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Close open child-history intervals at `valid_to`; `collection`
    /// `None` closes every collection of the resource.
    async fn close_child_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collection: Option<&str>,
        valid_to: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Identifiers of current rows in scope with `collected_at` strictly
    /// before the cutoff.
    async fn find_stale(
        &mut self,
        kind: &str,
        scope: &Scope,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<String>>;

    /// Commit the transaction.
    async fn commit(self) -> StoreResult<()>;

    /// Roll the transaction back explicitly.
    async fn rollback(self) -> StoreResult<()>;
}
