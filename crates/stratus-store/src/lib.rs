//! The bitemporal versioning engine.
//!
//! [`VersionedResourceStore`] reconciles freshly observed provider records
//! against stored current state inside one transaction: diff, upsert the
//! current row, replace child collections, and maintain an append-only
//! history of non-overlapping validity intervals. A separate staleness
//! sweep retires resources a provider stopped reporting.
//!
//! The engine is generic over a [`Storage`] backend; production uses the
//! PostgreSQL implementation, tests use [`memory::MemoryStorage`].

pub mod diff;
pub mod engine;
pub mod memory;
pub mod model;
pub mod storage;

pub use diff::{diff_record, DiffOutcome, RecordDiff};
pub use engine::{ReconcileSummary, SweepSummary, VersionedResourceStore};
pub use model::StoredRecord;
pub use storage::{Storage, StorageTx, StoreError, StoreResult};
