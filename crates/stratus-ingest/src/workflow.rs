//! The three-level workflow tree.
//!
//! Inventory level: fan out over every registered provider × scope on a
//! `JoinSet`, isolating failures per scope. Provider level: sequence the
//! provider's resource kinds under one bounded deadline. Resource-type
//! level: pin the batch observation time, run the ingestion activity
//! through its retry loop, then sweep staleness best-effort.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, warn};

use stratus_config::ProviderSettings;
use stratus_core::{KindDescriptor, RunId, Scope};
use stratus_provider::{ProviderRegistry, RegisteredProvider};
use stratus_store::{ReconcileSummary, Storage};
use stratus_workflow::{
    run_activity, ActivityOptions, CancellationToken, ExecutionStatus, RetryPolicy,
};

use crate::activity::IngestionActivity;
use crate::run::RunStore;

/// Timeouts and retry configuration for one provider's workflows.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Options for each resource-type ingestion activity.
    pub activity: ActivityOptions,
    /// Deadline for one provider × scope pass across all its kinds.
    pub provider_timeout: Duration,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            activity: ActivityOptions::default(),
            provider_timeout: Duration::from_secs(900),
        }
    }
}

impl WorkflowOptions {
    /// Derive options from a provider's configuration.
    #[must_use]
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            activity: ActivityOptions {
                start_to_close: Duration::from_secs(settings.list_timeout_secs),
                heartbeat_timeout: Some(Duration::from_secs(settings.heartbeat_timeout_secs)),
                retry: RetryPolicy::default(),
            },
            provider_timeout: Duration::from_secs(settings.provider_timeout_secs),
        }
    }
}

/// Result of one (scope, kind) pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeKindResult {
    /// The scope covered.
    pub scope: Scope,
    /// The resource kind covered.
    pub kind: String,
    /// Terminal status of the pass.
    pub status: ExecutionStatus,
    /// Reconcile counts when the pass completed.
    pub summary: Option<ReconcileSummary>,
    /// Resources retired by the sweep.
    pub retired: usize,
    /// Error string when the pass failed; sibling scopes are unaffected.
    pub error: Option<String>,
}

/// Aggregate result of one inventory cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryReport {
    /// Bookkeeping row id, when run tracking is wired.
    pub run_id: Option<RunId>,
    /// When the cycle started.
    pub started_at: DateTime<Utc>,
    /// When the cycle finished.
    pub completed_at: DateTime<Utc>,
    /// Every (scope, kind) result, ordered by scope then kind.
    pub results: Vec<ScopeKindResult>,
}

impl InventoryReport {
    /// Number of passes that completed.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == ExecutionStatus::Completed)
            .count()
    }

    /// Number of passes that failed or were cancelled.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.completed()
    }
}

/// Top-level workflow: one call is one inventory cycle.
pub struct InventoryWorkflow<S> {
    activity: IngestionActivity<S>,
    default_options: WorkflowOptions,
    provider_options: BTreeMap<String, WorkflowOptions>,
    runs: Option<RunStore>,
}

impl<S: Storage + 'static> InventoryWorkflow<S> {
    /// Workflow over the given activity.
    #[must_use]
    pub fn new(activity: IngestionActivity<S>) -> Self {
        Self {
            activity,
            default_options: WorkflowOptions::default(),
            provider_options: BTreeMap::new(),
            runs: None,
        }
    }

    /// Replace the default options.
    #[must_use]
    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.default_options = options;
        self
    }

    /// Override options for one provider.
    #[must_use]
    pub fn with_provider_options(mut self, provider: impl Into<String>, options: WorkflowOptions) -> Self {
        self.provider_options.insert(provider.into(), options);
        self
    }

    /// Enable run bookkeeping.
    #[must_use]
    pub fn with_run_store(mut self, runs: RunStore) -> Self {
        self.runs = Some(runs);
        self
    }

    fn options_for(&self, provider: &str) -> WorkflowOptions {
        self.provider_options
            .get(provider)
            .unwrap_or(&self.default_options)
            .clone()
    }

    /// Run one inventory cycle over every registered provider and scope.
    pub async fn run(
        &self,
        registry: &ProviderRegistry,
        cancel: &CancellationToken,
    ) -> InventoryReport {
        let started_at = Utc::now();
        let run_id = self.create_run().await;

        let mut join_set: JoinSet<Vec<ScopeKindResult>> = JoinSet::new();
        for registered in registry.iter() {
            for scope in &registered.scopes {
                let activity = self.activity.clone();
                let registered = registered.clone();
                let scope = scope.clone();
                let options = self.options_for(&registered.name);
                let child_cancel = cancel.child();
                join_set.spawn(async move {
                    provider_scope_pass(&activity, &registered, &scope, &options, &child_cancel)
                        .await
                });
            }
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(mut scope_results) => results.append(&mut scope_results),
                Err(e) => error!(error = %e, "scope task aborted"),
            }
        }
        results.sort_by(|a, b| (a.scope.key(), &a.kind).cmp(&(b.scope.key(), &b.kind)));

        let report = InventoryReport {
            run_id,
            started_at,
            completed_at: Utc::now(),
            results,
        };
        info!(
            completed = report.completed(),
            failed = report.failed(),
            "inventory cycle finished"
        );

        self.finish_run(&report, cancel.is_cancelled()).await;
        report
    }

    async fn create_run(&self) -> Option<RunId> {
        let runs = self.runs.as_ref()?;
        match runs.create().await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "could not record ingestion run start");
                None
            }
        }
    }

    async fn finish_run(&self, report: &InventoryReport, cancelled: bool) {
        let (Some(runs), Some(run_id)) = (self.runs.as_ref(), report.run_id) else {
            return;
        };
        let status = if cancelled {
            ExecutionStatus::Cancelled
        } else if report.completed() == 0 && !report.results.is_empty() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        let statistics = serde_json::to_value(&report.results).unwrap_or_default();
        let first_error = report
            .results
            .iter()
            .find_map(|r| r.error.clone());
        if let Err(e) = runs
            .finish(run_id, status, &statistics, first_error.as_deref())
            .await
        {
            warn!(error = %e, "could not record ingestion run completion");
        }
    }
}

/// Provider level: sequence the provider's kinds under one deadline.
async fn provider_scope_pass<S: Storage>(
    activity: &IngestionActivity<S>,
    registered: &Arc<RegisteredProvider>,
    scope: &Scope,
    options: &WorkflowOptions,
    cancel: &CancellationToken,
) -> Vec<ScopeKindResult> {
    let deadline = Instant::now() + options.provider_timeout;
    let mut results = Vec::with_capacity(registered.kinds.len());
    let mut deadline_hit = false;

    for kind in &registered.kinds {
        if deadline_hit || cancel.is_cancelled() {
            results.push(ScopeKindResult {
                scope: scope.clone(),
                kind: kind.kind.to_string(),
                status: if cancel.is_cancelled() {
                    ExecutionStatus::Cancelled
                } else {
                    ExecutionStatus::Failed
                },
                summary: None,
                retired: 0,
                error: Some(if cancel.is_cancelled() {
                    "cancelled".to_string()
                } else {
                    "provider deadline exceeded before this kind ran".to_string()
                }),
            });
            continue;
        }

        match tokio::time::timeout_at(
            deadline,
            resource_type_pass(activity, registered, *kind, scope, options, cancel),
        )
        .await
        {
            Ok(result) => results.push(result),
            Err(_elapsed) => {
                warn!(
                    provider = %registered.name,
                    scope = %scope,
                    kind = kind.kind,
                    "provider pass deadline exceeded"
                );
                deadline_hit = true;
                results.push(ScopeKindResult {
                    scope: scope.clone(),
                    kind: kind.kind.to_string(),
                    status: ExecutionStatus::Failed,
                    summary: None,
                    retired: 0,
                    error: Some("provider deadline exceeded".to_string()),
                });
            }
        }
    }

    results
}

/// Resource-type level: one ingestion activity, then the sweep.
async fn resource_type_pass<S: Storage>(
    activity: &IngestionActivity<S>,
    registered: &Arc<RegisteredProvider>,
    kind: KindDescriptor,
    scope: &Scope,
    options: &WorkflowOptions,
    cancel: &CancellationToken,
) -> ScopeKindResult {
    // Pinned once per logical batch: every retry of this activity stamps
    // the same observation time, so records written by an earlier attempt
    // cannot look stale to the sweep that follows.
    let collected_at = Utc::now();
    let name = format!("ingest/{}/{}", kind.kind, scope.key());

    let outcome = run_activity(&name, &options.activity, cancel, |ctx| {
        let activity = activity.clone();
        let registered = registered.clone();
        let scope = scope.clone();
        async move {
            activity
                .ingest(&registered, &kind, &scope, collected_at, &ctx)
                .await
        }
    })
    .await;

    match outcome {
        Ok(summary) => {
            // The sweep never fails the pass that fed it.
            let retired = match activity.sweep(&kind, scope, collected_at).await {
                Ok(sweep) => sweep.retired,
                Err(e) => {
                    warn!(
                        kind = kind.kind,
                        scope = %scope,
                        error = %e,
                        "staleness sweep failed, continuing"
                    );
                    0
                }
            };
            ScopeKindResult {
                scope: scope.clone(),
                kind: kind.kind.to_string(),
                status: ExecutionStatus::Completed,
                summary: Some(summary),
                retired,
                error: None,
            }
        }
        Err(failure) => {
            let status = if failure.is_cancelled() {
                ExecutionStatus::Cancelled
            } else {
                ExecutionStatus::Failed
            };
            warn!(
                kind = kind.kind,
                scope = %scope,
                error = %failure,
                "resource type pass failed"
            );
            ScopeKindResult {
                scope: scope.clone(),
                kind: kind.kind.to_string(),
                status,
                summary: None,
                retired: 0,
                error: Some(failure.to_string()),
            }
        }
    }
}
