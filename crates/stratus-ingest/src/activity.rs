//! The retryable units of work.
//!
//! One ingestion activity is: acquire a rate-limit permit, list the scope
//! through the provider's circuit breaker, convert every raw record
//! (fail-fast: a partially converted batch would corrupt the diff), and
//! reconcile the batch in one transaction. The staleness sweep is a
//! separate activity the workflow runs afterwards, best-effort.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use stratus_core::{KindDescriptor, Scope};
use stratus_provider::{RateLimiter, RegisteredProvider};
use stratus_store::{ReconcileSummary, Storage, SweepSummary, VersionedResourceStore};
use stratus_workflow::ActivityContext;

use crate::error::IngestError;

/// Ingests one (kind, scope) batch per call.
pub struct IngestionActivity<S> {
    store: Arc<VersionedResourceStore<S>>,
    limiter: Arc<RateLimiter>,
}

impl<S> Clone for IngestionActivity<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            limiter: self.limiter.clone(),
        }
    }
}

impl<S: Storage> IngestionActivity<S> {
    /// Activity over the given engine and shared limiter.
    #[must_use]
    pub fn new(store: Arc<VersionedResourceStore<S>>, limiter: Arc<RateLimiter>) -> Self {
        Self { store, limiter }
    }

    /// List, convert, reconcile.
    ///
    /// `collected_at` is pinned by the caller once per logical batch so a
    /// retried attempt stamps the same observation time as the attempt it
    /// replaces.
    #[instrument(skip_all, fields(kind = kind.kind, scope = %scope))]
    pub async fn ingest(
        &self,
        registered: &RegisteredProvider,
        kind: &KindDescriptor,
        scope: &Scope,
        collected_at: DateTime<Utc>,
        ctx: &ActivityContext,
    ) -> Result<ReconcileSummary, IngestError> {
        // Every outbound call waits for the shared provider throttle.
        self.limiter.acquire(&scope.provider, ctx.cancellation()).await?;
        ctx.record_heartbeat();

        let heartbeat = ctx.heartbeat();
        let provider = &registered.provider;
        let raw = registered
            .breaker
            .execute(|| provider.list(kind, scope, &heartbeat))
            .await?;
        ctx.record_heartbeat();
        debug!(listed = raw.len(), "provider listing complete");

        let mut records = Vec::with_capacity(raw.len());
        for record in raw {
            records.push(registered.provider.convert(kind, record)?);
        }
        ctx.record_heartbeat();

        let summary = self.store.reconcile(kind, scope, records, collected_at).await?;
        Ok(summary)
    }

    /// Retire resources the batch stamped `collected_at` did not touch.
    pub async fn sweep(
        &self,
        kind: &KindDescriptor,
        scope: &Scope,
        collected_at: DateTime<Utc>,
    ) -> Result<SweepSummary, IngestError> {
        Ok(self.store.sweep_stale(kind, scope, collected_at).await?)
    }
}
