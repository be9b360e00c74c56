//! Ingestion run bookkeeping.
//!
//! One row per inventory cycle so operators can see what ran, what it
//! touched, and what failed, without grepping logs. Best-effort by
//! design: run bookkeeping never fails an ingestion cycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use stratus_core::RunId;
use stratus_db::PgStorage;
use stratus_store::{StoreError, StoreResult};
use stratus_workflow::ExecutionStatus;

/// One inventory cycle's bookkeeping row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionRun {
    /// Run identifier.
    pub id: RunId,
    /// Lifecycle status.
    pub status: ExecutionStatus,
    /// Per-scope results as JSON.
    pub statistics: Value,
    /// Error summary for failed runs.
    pub error_message: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Persists [`IngestionRun`] rows.
#[derive(Clone)]
pub struct RunStore {
    storage: PgStorage,
}

impl RunStore {
    /// Store over the live database pool.
    #[must_use]
    pub fn new(storage: PgStorage) -> Self {
        Self { storage }
    }

    /// Insert a new running row and return its id.
    pub async fn create(&self) -> StoreResult<RunId> {
        let id = RunId::new();
        sqlx::query(
            r"
            INSERT INTO ingestion_runs (id, status, statistics, started_at)
            VALUES ($1, $2, '[]'::jsonb, NOW())
            ",
        )
        .bind(id.as_uuid())
        .bind(ExecutionStatus::Running.to_string())
        .execute(&*self.storage.pool())
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(id)
    }

    /// Move a run to a terminal status with its statistics.
    pub async fn finish(
        &self,
        id: RunId,
        status: ExecutionStatus,
        statistics: &Value,
        error_message: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r"
            UPDATE ingestion_runs
            SET status = $2, statistics = $3, error_message = $4, completed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .bind(status.to_string())
        .bind(statistics)
        .bind(error_message)
        .execute(&*self.storage.pool())
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// Load one run row.
    pub async fn get(&self, id: RunId) -> StoreResult<Option<IngestionRun>> {
        let row: Option<RunRow> = sqlx::query_as(
            r"
            SELECT id, status, statistics, error_message, started_at, completed_at
            FROM ingestion_runs
            WHERE id = $1
            ",
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.storage.pool())
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.map(RunRow::into_run))
    }
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    status: String,
    statistics: Value,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl RunRow {
    fn into_run(self) -> IngestionRun {
        IngestionRun {
            id: RunId::from_uuid(self.id),
            status: self.status.parse().unwrap_or(ExecutionStatus::Failed),
            statistics: self.statistics,
            error_message: self.error_message,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}
