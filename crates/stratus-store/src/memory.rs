//! In-memory storage backend.
//!
//! Backs the engine's behavior tests and local development. Transactions
//! stage against a copy of the shared state and publish it on commit, so
//! rollback and mid-batch failure genuinely leave no visible writes.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use stratus_core::{ChildItem, Scope};

use crate::model::StoredRecord;
use crate::storage::{Storage, StorageTx, StoreError, StoreResult};

/// One parent history interval.
#[derive(Debug, Clone)]
pub struct HistoryRow {
    /// Resource kind.
    pub kind: String,
    /// Owning scope.
    pub scope: Scope,
    /// Resource identifier.
    pub resource_id: String,
    /// Attribute snapshot for the interval.
    pub attributes: Map<String, Value>,
    /// Carried-forward first observation time.
    pub first_collected_at: DateTime<Utc>,
    /// Interval start, inclusive.
    pub valid_from: DateTime<Utc>,
    /// Interval end, exclusive; `None` while current.
    pub valid_to: Option<DateTime<Utc>>,
}

/// One child-collection history interval.
#[derive(Debug, Clone)]
pub struct ChildHistoryRow {
    /// Resource kind.
    pub kind: String,
    /// Owning scope.
    pub scope: Scope,
    /// Resource identifier.
    pub resource_id: String,
    /// Collection name.
    pub collection: String,
    /// Collection snapshot for the interval.
    pub items: Vec<ChildItem>,
    /// Interval start, inclusive.
    pub valid_from: DateTime<Utc>,
    /// Interval end, exclusive; `None` while current.
    pub valid_to: Option<DateTime<Utc>>,
}

type RecordKey = (String, String, String);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    current: BTreeMap<RecordKey, StoredRecord>,
    history: Vec<HistoryRow>,
    child_history: Vec<ChildHistoryRow>,
}

fn key(kind: &str, scope: &Scope, resource_id: &str) -> RecordKey {
    (kind.to_string(), scope.key(), resource_id.to_string())
}

/// In-memory [`Storage`] implementation.
#[derive(Clone)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    // Remaining successful operations before injected failure; negative
    // means fault injection is disabled.
    op_budget: Arc<AtomicIsize>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    /// Empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            op_budget: Arc::new(AtomicIsize::new(isize::MIN)),
        }
    }

    /// Fault injection: let the next `ops` transaction operations succeed,
    /// then fail every one after that with a backend error.
    pub fn fail_after(&self, ops: usize) {
        self.op_budget
            .store(isize::try_from(ops).unwrap_or(isize::MAX), Ordering::SeqCst);
    }

    /// Turn fault injection off again.
    pub fn clear_fault(&self) {
        self.op_budget.store(isize::MIN, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All committed current rows.
    #[must_use]
    pub fn current_records(&self) -> Vec<StoredRecord> {
        self.lock().current.values().cloned().collect()
    }

    /// One committed current row.
    #[must_use]
    pub fn current_record(
        &self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> Option<StoredRecord> {
        self.lock().current.get(&key(kind, scope, resource_id)).cloned()
    }

    /// All committed parent history rows for one resource, in insertion
    /// order.
    #[must_use]
    pub fn history_rows(&self, resource_id: &str) -> Vec<HistoryRow> {
        self.lock()
            .history
            .iter()
            .filter(|row| row.resource_id == resource_id)
            .cloned()
            .collect()
    }

    /// All committed child history rows for one resource and collection.
    #[must_use]
    pub fn child_history_rows(&self, resource_id: &str, collection: &str) -> Vec<ChildHistoryRow> {
        self.lock()
            .child_history
            .iter()
            .filter(|row| row.resource_id == resource_id && row.collection == collection)
            .cloned()
            .collect()
    }

    /// History rows whose interval contains `at`. The non-overlap
    /// invariant means callers should see at most one per resource.
    #[must_use]
    pub fn history_rows_at(&self, resource_id: &str, at: DateTime<Utc>) -> Vec<HistoryRow> {
        self.lock()
            .history
            .iter()
            .filter(|row| {
                row.resource_id == resource_id
                    && row.valid_from <= at
                    && row.valid_to.is_none_or(|to| to > at)
            })
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Tx = MemoryTx;

    async fn begin(&self) -> StoreResult<MemoryTx> {
        Ok(MemoryTx {
            shared: self.state.clone(),
            staged: self.lock().clone(),
            op_budget: self.op_budget.clone(),
        })
    }
}

/// One open in-memory transaction.
pub struct MemoryTx {
    shared: Arc<Mutex<MemoryState>>,
    staged: MemoryState,
    op_budget: Arc<AtomicIsize>,
}

impl MemoryTx {
    fn charge(&self) -> StoreResult<()> {
        let before = self.op_budget.load(Ordering::SeqCst);
        if before == isize::MIN {
            return Ok(());
        }
        if self.op_budget.fetch_sub(1, Ordering::SeqCst) <= 0 {
            return Err(StoreError::Backend("injected failure".to_string()));
        }
        Ok(())
    }

    fn record_mut(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<&mut StoredRecord> {
        self.staged
            .current
            .get_mut(&key(kind, scope, resource_id))
            .ok_or_else(|| StoreError::Backend(format!("no current row for {resource_id}")))
    }
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn load_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<Option<StoredRecord>> {
        self.charge()?;
        Ok(self.staged.current.get(&key(kind, scope, resource_id)).cloned())
    }

    async fn upsert_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        record: &StoredRecord,
    ) -> StoreResult<()> {
        self.charge()?;
        // Child rows live behind replace_children, exactly like the SQL
        // backend's child table; an upsert never touches them.
        match self.staged.current.get_mut(&key(kind, scope, &record.resource_id)) {
            Some(existing) => {
                existing.attributes = record.attributes.clone();
                existing.collected_at = record.collected_at;
                existing.first_collected_at = record.first_collected_at;
            }
            None => {
                let mut inserted = record.clone();
                inserted.children.clear();
                self.staged
                    .current
                    .insert(key(kind, scope, &record.resource_id), inserted);
            }
        }
        Ok(())
    }

    async fn update_collected_at(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collected_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.charge()?;
        self.record_mut(kind, scope, resource_id)?.collected_at = collected_at;
        Ok(())
    }

    async fn delete_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<()> {
        self.charge()?;
        self.staged.current.remove(&key(kind, scope, resource_id));
        Ok(())
    }

    async fn replace_children(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collection: &str,
        items: &[ChildItem],
    ) -> StoreResult<()> {
        self.charge()?;
        let record = self.record_mut(kind, scope, resource_id)?;
        if items.is_empty() {
            record.children.remove(collection);
        } else {
            record
                .children
                .insert(collection.to_string(), items.to_vec());
        }
        Ok(())
    }

    async fn delete_children(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<()> {
        self.charge()?;
        self.record_mut(kind, scope, resource_id)?.children.clear();
        Ok(())
    }

    async fn open_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        record: &StoredRecord,
        valid_from: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.charge()?;
        self.staged.history.push(HistoryRow {
            kind: kind.to_string(),
            scope: scope.clone(),
            resource_id: record.resource_id.clone(),
            attributes: record.attributes.clone(),
            first_collected_at: record.first_collected_at,
            valid_from,
            valid_to: None,
        });
        Ok(())
    }

    async fn close_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        valid_to: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.charge()?;
        for row in &mut self.staged.history {
            if row.kind == kind
                && row.scope == *scope
                && row.resource_id == resource_id
                && row.valid_to.is_none()
            {
                row.valid_to = Some(valid_to);
            }
        }
        Ok(())
    }

    async fn open_child_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collection: &str,
        items: &[ChildItem],
        valid_from: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.charge()?;
        self.staged.child_history.push(ChildHistoryRow {
            kind: kind.to_string(),
            scope: scope.clone(),
            resource_id: resource_id.to_string(),
            collection: collection.to_string(),
            items: items.to_vec(),
            valid_from,
            valid_to: None,
        });
        Ok(())
    }

    async fn close_child_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collection: Option<&str>,
        valid_to: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.charge()?;
        for row in &mut self.staged.child_history {
            if row.kind == kind
                && row.scope == *scope
                && row.resource_id == resource_id
                && row.valid_to.is_none()
                && collection.is_none_or(|c| row.collection == c)
            {
                row.valid_to = Some(valid_to);
            }
        }
        Ok(())
    }

    async fn find_stale(
        &mut self,
        kind: &str,
        scope: &Scope,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<String>> {
        self.charge()?;
        let scope_key = scope.key();
        Ok(self
            .staged
            .current
            .iter()
            .filter(|((row_kind, row_scope, _), record)| {
                row_kind == kind && *row_scope == scope_key && record.collected_at < cutoff
            })
            .map(|((_, _, resource_id), _)| resource_id.clone())
            .collect())
    }

    async fn commit(self) -> StoreResult<()> {
        *self.shared.lock().unwrap_or_else(|e| e.into_inner()) = self.staged;
        Ok(())
    }

    async fn rollback(self) -> StoreResult<()> {
        // Staged state is simply dropped.
        Ok(())
    }
}
