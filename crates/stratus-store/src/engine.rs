//! The reconcile and sweep operations.

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use stratus_core::{CanonicalRecord, KindDescriptor, Scope};

use crate::diff::{diff_record, DiffOutcome};
use crate::model::StoredRecord;
use crate::storage::{Storage, StorageTx, StoreResult};

/// Per-batch outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReconcileSummary {
    /// Records in the observed batch.
    pub observed: usize,
    /// Resources seen for the first time.
    pub created: usize,
    /// Resources with a top-level attribute change.
    pub updated: usize,
    /// Resources where only child collections changed.
    pub child_only: usize,
    /// Write-skipped resources; only `collected_at` advanced.
    pub unchanged: usize,
}

/// Staleness sweep outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SweepSummary {
    /// Resources retired: history closed, current row deleted.
    pub retired: usize,
}

enum RecordOutcome {
    Created,
    Updated,
    ChildOnly,
    Unchanged,
}

/// The generic bitemporal engine. Every resource kind goes through the
/// same two operations, parameterized only by its [`KindDescriptor`].
pub struct VersionedResourceStore<S> {
    storage: S,
}

impl<S: Storage> VersionedResourceStore<S> {
    /// Wrap a storage backend.
    #[must_use]
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// The underlying backend.
    #[must_use]
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Reconcile one observed batch against stored state.
    ///
    /// The whole batch runs in one transaction: any record failing aborts
    /// everything with a rollback, leaving zero visible writes. A batch
    /// carrying duplicate identifiers applies them in order; the later
    /// record diffs against the earlier one's staged write.
    #[instrument(skip_all, fields(kind = kind.kind, scope = %scope))]
    pub async fn reconcile(
        &self,
        kind: &KindDescriptor,
        scope: &Scope,
        observed: Vec<CanonicalRecord>,
        collected_at: DateTime<Utc>,
    ) -> StoreResult<ReconcileSummary> {
        let mut tx = self.storage.begin().await?;

        match Self::apply_batch(&mut tx, kind, scope, observed, collected_at).await {
            Ok(summary) => {
                tx.commit().await?;
                debug!(
                    observed = summary.observed,
                    created = summary.created,
                    updated = summary.updated,
                    child_only = summary.child_only,
                    unchanged = summary.unchanged,
                    "batch reconciled"
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed batch also failed");
                }
                Err(e)
            }
        }
    }

    async fn apply_batch(
        tx: &mut S::Tx,
        kind: &KindDescriptor,
        scope: &Scope,
        observed: Vec<CanonicalRecord>,
        collected_at: DateTime<Utc>,
    ) -> StoreResult<ReconcileSummary> {
        let mut summary = ReconcileSummary {
            observed: observed.len(),
            ..ReconcileSummary::default()
        };

        for record in observed {
            match Self::reconcile_one(tx, kind, scope, record, collected_at).await? {
                RecordOutcome::Created => summary.created += 1,
                RecordOutcome::Updated => summary.updated += 1,
                RecordOutcome::ChildOnly => summary.child_only += 1,
                RecordOutcome::Unchanged => summary.unchanged += 1,
            }
        }

        Ok(summary)
    }

    async fn reconcile_one(
        tx: &mut S::Tx,
        kind: &KindDescriptor,
        scope: &Scope,
        record: CanonicalRecord,
        collected_at: DateTime<Utc>,
    ) -> StoreResult<RecordOutcome> {
        let existing = tx.load_current(kind.kind, scope, &record.resource_id).await?;
        let diff = diff_record(kind, &record, existing.as_ref());

        if let Some(existing) = &existing {
            if diff.is_write_skip() {
                // Write-skip: history growth stays O(changes), not O(polls).
                tx.update_collected_at(kind.kind, scope, &existing.resource_id, collected_at)
                    .await?;
                return Ok(RecordOutcome::Unchanged);
            }
        }

        let stored = StoredRecord {
            resource_id: record.resource_id,
            attributes: record.attributes,
            children: record.children,
            collected_at,
            first_collected_at: existing
                .as_ref()
                .map_or(collected_at, |e| e.first_collected_at),
        };

        match (existing.is_some(), diff.outcome) {
            (false, _) => {
                tx.upsert_current(kind.kind, scope, &stored).await?;
                for collection in kind.child_collections {
                    tx.replace_children(
                        kind.kind,
                        scope,
                        &stored.resource_id,
                        collection,
                        stored.child_items(collection),
                    )
                    .await?;
                }
                tx.open_history(kind.kind, scope, &stored, collected_at).await?;
                for collection in kind.child_collections {
                    let items = stored.child_items(collection);
                    if !items.is_empty() {
                        tx.open_child_history(
                            kind.kind,
                            scope,
                            &stored.resource_id,
                            collection,
                            items,
                            collected_at,
                        )
                        .await?;
                    }
                }
                Ok(RecordOutcome::Created)
            }
            (true, DiffOutcome::Changed) => {
                tx.upsert_current(kind.kind, scope, &stored).await?;
                for collection in kind.child_collections {
                    tx.replace_children(
                        kind.kind,
                        scope,
                        &stored.resource_id,
                        collection,
                        stored.child_items(collection),
                    )
                    .await?;
                }
                // Close-then-reopen keeps intervals gap-free and
                // non-overlapping under partial field change.
                tx.close_history(kind.kind, scope, &stored.resource_id, collected_at)
                    .await?;
                tx.open_history(kind.kind, scope, &stored, collected_at).await?;
                tx.close_child_history(kind.kind, scope, &stored.resource_id, None, collected_at)
                    .await?;
                for collection in kind.child_collections {
                    let items = stored.child_items(collection);
                    if !items.is_empty() {
                        tx.open_child_history(
                            kind.kind,
                            scope,
                            &stored.resource_id,
                            collection,
                            items,
                            collected_at,
                        )
                        .await?;
                    }
                }
                Ok(RecordOutcome::Updated)
            }
            (true, _) => {
                // Child-only change: the parent interval stays open.
                tx.upsert_current(kind.kind, scope, &stored).await?;
                for collection in &diff.changed_children {
                    let items = stored.child_items(collection);
                    tx.replace_children(kind.kind, scope, &stored.resource_id, collection, items)
                        .await?;
                    tx.close_child_history(
                        kind.kind,
                        scope,
                        &stored.resource_id,
                        Some(collection),
                        collected_at,
                    )
                    .await?;
                    if !items.is_empty() {
                        tx.open_child_history(
                            kind.kind,
                            scope,
                            &stored.resource_id,
                            collection,
                            items,
                            collected_at,
                        )
                        .await?;
                    }
                }
                Ok(RecordOutcome::ChildOnly)
            }
        }
    }

    /// Retire resources the latest batch did not touch.
    ///
    /// Runs in its own transaction, separate from any reconcile. Callers
    /// treat errors as best-effort: a failed sweep is logged upstream and
    /// never blocks the ingestion run that triggered it.
    #[instrument(skip_all, fields(kind = kind.kind, scope = %scope))]
    pub async fn sweep_stale(
        &self,
        kind: &KindDescriptor,
        scope: &Scope,
        collected_at: DateTime<Utc>,
    ) -> StoreResult<SweepSummary> {
        let mut tx = self.storage.begin().await?;

        match Self::apply_sweep(&mut tx, kind, scope, collected_at).await {
            Ok(retired) => {
                tx.commit().await?;
                if retired > 0 {
                    info!(retired, "stale resources retired");
                }
                Ok(SweepSummary { retired })
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback after failed sweep also failed");
                }
                Err(e)
            }
        }
    }

    async fn apply_sweep(
        tx: &mut S::Tx,
        kind: &KindDescriptor,
        scope: &Scope,
        collected_at: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let stale = tx.find_stale(kind.kind, scope, collected_at).await?;

        for resource_id in &stale {
            tx.close_history(kind.kind, scope, resource_id, collected_at).await?;
            tx.close_child_history(kind.kind, scope, resource_id, None, collected_at)
                .await?;
            tx.delete_children(kind.kind, scope, resource_id).await?;
            tx.delete_current(kind.kind, scope, resource_id).await?;
        }

        Ok(stale.len())
    }
}
