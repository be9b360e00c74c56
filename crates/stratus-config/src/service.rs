//! The live configuration service.

use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{error, info};

use crate::backend::{ConfigBackend, WatchGuard};
use crate::model::AppConfig;
use crate::ConfigResult;

/// Callback invoked after a successful reload with (old, new) snapshots.
pub type ReloadCallback = Arc<dyn Fn(&AppConfig, &AppConfig) + Send + Sync>;

struct ServiceInner {
    backend: Arc<dyn ConfigBackend>,
    current: RwLock<Arc<AppConfig>>,
    callbacks: RwLock<Vec<ReloadCallback>>,
    watch_guard: Mutex<Option<WatchGuard>>,
}

/// Process-wide configuration with live reload.
///
/// Cloning is cheap; all clones share the same snapshot.
#[derive(Clone)]
pub struct ConfigService {
    inner: Arc<ServiceInner>,
}

impl ConfigService {
    /// Load the initial snapshot and, when `watch` is set, subscribe to
    /// backend change notifications.
    ///
    /// The initial load is synchronous and its failure is fatal: a process
    /// that cannot read configuration at startup must not come up.
    pub fn start(backend: Arc<dyn ConfigBackend>, watch: bool) -> ConfigResult<Self> {
        let initial = backend.load()?;
        info!(backend = backend.name(), "configuration loaded");

        let service = Self {
            inner: Arc::new(ServiceInner {
                backend,
                current: RwLock::new(Arc::new(initial)),
                callbacks: RwLock::new(Vec::new()),
                watch_guard: Mutex::new(None),
            }),
        };

        if watch {
            // The watcher holds only a weak handle so a stopped service is
            // actually dropped.
            let weak: Weak<ServiceInner> = Arc::downgrade(&service.inner);
            let guard = service.inner.backend.watch(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    let _ = (Self { inner }).reload();
                }
            }))?;
            *service
                .inner
                .watch_guard
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = guard;
        }

        Ok(service)
    }

    /// The current snapshot. Cheap; never blocks other readers.
    #[must_use]
    pub fn config(&self) -> Arc<AppConfig> {
        self.inner
            .current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Register a callback invoked after every successful reload.
    pub fn on_reload(&self, callback: impl Fn(&AppConfig, &AppConfig) + Send + Sync + 'static) {
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(callback));
    }

    /// Re-read the backend and swap the snapshot.
    ///
    /// On failure the previous snapshot stays in place: the process keeps
    /// running on stale configuration rather than going down. Callbacks
    /// run outside every lock.
    pub fn reload(&self) -> ConfigResult<()> {
        let new = match self.inner.backend.load() {
            Ok(config) => Arc::new(config),
            Err(e) => {
                error!(
                    backend = self.inner.backend.name(),
                    error = %e,
                    "configuration reload failed, keeping previous snapshot"
                );
                return Err(e);
            }
        };

        let old = {
            let mut current = self.inner.current.write().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *current, new.clone())
        };

        let callbacks = self
            .inner
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for callback in callbacks {
            callback(&old, &new);
        }

        info!(backend = self.inner.backend.name(), "configuration reloaded");
        Ok(())
    }

    /// Stop watching the backend. Snapshot reads keep working.
    pub fn stop(&self) {
        self.inner
            .watch_guard
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }
}
