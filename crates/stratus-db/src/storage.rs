//! PostgreSQL implementation of the storage traits.
//!
//! Row layout: `resource_current` holds one row per live resource with a
//! JSONB attribute document; `resource_child_current` one row per child
//! item; `resource_history` and `resource_child_history` carry the
//! interval rows (`valid_to IS NULL` marks the open interval). Everything
//! is keyed by (kind, provider, account, region, resource_id).

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgPool, Postgres, Transaction};

use stratus_core::{ChildItem, HistoryId, Scope};
use stratus_store::{Storage, StorageTx, StoreError, StoreResult, StoredRecord};

use crate::ConnectionManager;

/// Production [`Storage`] backend.
///
/// Resolves the live pool at `begin` time, so a connection hot-swap is
/// picked up by the next transaction while in-flight ones finish on the
/// pool they started with.
#[derive(Clone)]
pub struct PgStorage {
    manager: ConnectionManager,
}

impl PgStorage {
    /// Storage on the manager's live pool.
    #[must_use]
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    /// The live pool, for run bookkeeping outside the engine.
    #[must_use]
    pub fn pool(&self) -> std::sync::Arc<PgPool> {
        self.manager.pool()
    }
}

#[async_trait]
impl Storage for PgStorage {
    type Tx = PgTx;

    async fn begin(&self) -> StoreResult<PgTx> {
        let pool = self.manager.pool();
        let tx = pool.begin().await.map_err(db_err)?;
        Ok(PgTx { tx })
    }
}

/// One open PostgreSQL transaction.
///
/// Dropping it without commit rolls back, which is exactly what the
/// engine relies on if a task is torn down mid-batch.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn attributes_to_map(value: Value) -> StoreResult<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::Serialization(format!(
            "attributes column is not a JSON object: {other}"
        ))),
    }
}

#[derive(sqlx::FromRow)]
struct CurrentRow {
    resource_id: String,
    attributes: Value,
    collected_at: DateTime<Utc>,
    first_collected_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ChildRow {
    collection: String,
    item_key: String,
    item_value: Value,
}

#[async_trait]
impl StorageTx for PgTx {
    async fn load_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<Option<StoredRecord>> {
        let row: Option<CurrentRow> = sqlx::query_as(
            r"
            SELECT resource_id, attributes, collected_at, first_collected_at
            FROM resource_current
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4 AND resource_id = $5
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let child_rows: Vec<ChildRow> = sqlx::query_as(
            r"
            SELECT collection, item_key, item_value
            FROM resource_child_current
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4 AND resource_id = $5
            ORDER BY collection, item_key
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)?;

        let mut children: BTreeMap<String, Vec<ChildItem>> = BTreeMap::new();
        for child in child_rows {
            children
                .entry(child.collection)
                .or_default()
                .push(ChildItem::new(child.item_key, child.item_value));
        }

        Ok(Some(StoredRecord {
            resource_id: row.resource_id,
            attributes: attributes_to_map(row.attributes)?,
            children,
            collected_at: row.collected_at,
            first_collected_at: row.first_collected_at,
        }))
    }

    async fn upsert_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        record: &StoredRecord,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO resource_current
                (kind, provider, account, region, resource_id,
                 attributes, collected_at, first_collected_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (kind, provider, account, region, resource_id)
            DO UPDATE SET
                attributes = EXCLUDED.attributes,
                collected_at = EXCLUDED.collected_at,
                first_collected_at = EXCLUDED.first_collected_at
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(&record.resource_id)
        .bind(Value::Object(record.attributes.clone()))
        .bind(record.collected_at)
        .bind(record.first_collected_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_collected_at(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        collected_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE resource_current
            SET collected_at = $6
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4 AND resource_id = $5
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .bind(collected_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_current(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            DELETE FROM resource_current
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4 AND resource_id = $5
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
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
        sqlx::query(
            r"
            DELETE FROM resource_child_current
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4 AND resource_id = $5
              AND collection = $6
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .bind(collection)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;

        for item in items {
            sqlx::query(
                r"
                INSERT INTO resource_child_current
                    (kind, provider, account, region, resource_id,
                     collection, item_key, item_value)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(kind)
            .bind(&scope.provider)
            .bind(&scope.account)
            .bind(scope.region.as_deref())
            .bind(resource_id)
            .bind(collection)
            .bind(&item.key)
            .bind(&item.value)
            .execute(&mut *self.tx)
            .await
            .map_err(db_err)?;
        }
        Ok(())
    }

    async fn delete_children(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            DELETE FROM resource_child_current
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4 AND resource_id = $5
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn open_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        record: &StoredRecord,
        valid_from: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            INSERT INTO resource_history
                (id, kind, provider, account, region, resource_id,
                 attributes, first_collected_at, valid_from, valid_to)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL)
            ",
        )
        .bind(HistoryId::new().as_uuid())
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(&record.resource_id)
        .bind(Value::Object(record.attributes.clone()))
        .bind(record.first_collected_at)
        .bind(valid_from)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn close_history(
        &mut self,
        kind: &str,
        scope: &Scope,
        resource_id: &str,
        valid_to: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE resource_history
            SET valid_to = $6
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4 AND resource_id = $5
              AND valid_to IS NULL
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .bind(valid_to)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
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
        let snapshot = serde_json::to_value(items)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        sqlx::query(
            r"
            INSERT INTO resource_child_history
                (id, kind, provider, account, region, resource_id,
                 collection, items, valid_from, valid_to)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NULL)
            ",
        )
        .bind(HistoryId::new().as_uuid())
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .bind(collection)
        .bind(snapshot)
        .bind(valid_from)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
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
        sqlx::query(
            r"
            UPDATE resource_child_history
            SET valid_to = $6
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4 AND resource_id = $5
              AND valid_to IS NULL
              AND ($7::text IS NULL OR collection = $7)
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(resource_id)
        .bind(valid_to)
        .bind(collection)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_stale(
        &mut self,
        kind: &str,
        scope: &Scope,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<String>> {
        sqlx::query_scalar(
            r"
            SELECT resource_id
            FROM resource_current
            WHERE kind = $1 AND provider = $2 AND account = $3
              AND region IS NOT DISTINCT FROM $4
              AND collected_at < $5
            ORDER BY resource_id
            ",
        )
        .bind(kind)
        .bind(&scope.provider)
        .bind(&scope.account)
        .bind(scope.region.as_deref())
        .bind(cutoff)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err)
    }

    async fn commit(self) -> StoreResult<()> {
        self.tx.commit().await.map_err(db_err)
    }

    async fn rollback(self) -> StoreResult<()> {
        self.tx.rollback().await.map_err(db_err)
    }
}
