//! Collector daemon: the composition root.
//!
//! Loads configuration (fatal if the initial load fails), opens the
//! database, registers providers explicitly, and runs inventory cycles on
//! the configured interval until a shutdown signal cancels the workflow
//! tree.

mod fixture;
mod providers;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stratus_config::{ConfigBackend, ConfigService, EnvBackend, FileBackend};
use stratus_db::{ConnectionManager, PgStorage};
use stratus_ingest::{IngestionActivity, InventoryWorkflow, RunStore, WorkflowOptions};
use stratus_provider::{ProviderRegistry, RateLimiter};
use stratus_store::VersionedResourceStore;
use stratus_workflow::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let backend: Arc<dyn ConfigBackend> = match std::env::var("STRATUS_CONFIG") {
        Ok(path) => {
            info!(path = %path, "loading configuration from file");
            Arc::new(FileBackend::new(path))
        }
        Err(_) => {
            info!("loading configuration from environment");
            Arc::new(EnvBackend::new())
        }
    };
    let config_service = ConfigService::start(backend, true)?;
    let config = config_service.config();

    let manager = ConnectionManager::connect(&config.database).await?;
    manager.register(&config_service);
    manager.on_swap(|old, new| {
        info!(old = %old, new = %new, "database connection swapped");
    });

    let limiter = Arc::new(RateLimiter::new());
    {
        // Rate ceilings follow configuration reloads without a restart.
        let limiter = limiter.clone();
        config_service.on_reload(move |_old, new| {
            for (name, settings) in &new.providers {
                limiter.set_rate(name, settings.requests_per_minute);
            }
        });
    }

    let mut registry = ProviderRegistry::new(limiter.clone());
    for descriptor in providers::descriptors(&config) {
        registry.register(descriptor)?;
    }
    if registry.is_empty() {
        warn!("no providers registered; inventory cycles will be empty");
    }
    for registered in registry.iter() {
        if let Err(e) = registered.provider.test_connection().await {
            warn!(provider = %registered.name, error = %e, "provider connection test failed");
        }
    }

    let storage = PgStorage::new(manager.clone());
    let store = Arc::new(VersionedResourceStore::new(storage.clone()));
    let mut workflow = InventoryWorkflow::new(IngestionActivity::new(store, limiter))
        .with_run_store(RunStore::new(storage));
    for (name, settings) in &config.providers {
        workflow =
            workflow.with_provider_options(name.clone(), WorkflowOptions::from_settings(settings));
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    info!("collector started");
    loop {
        let report = workflow.run(&registry, &cancel).await;
        info!(
            run_id = ?report.run_id,
            completed = report.completed(),
            failed = report.failed(),
            "inventory cycle complete"
        );

        if cancel.is_cancelled() {
            break;
        }
        // Interval is re-read every cycle so reloads take effect live.
        let interval = Duration::from_secs(config_service.config().poll_interval_secs);
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = cancel.cancelled() => break,
        }
    }

    config_service.stop();
    info!("collector stopped");
    Ok(())
}
