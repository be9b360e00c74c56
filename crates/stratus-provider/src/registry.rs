//! Provider registry.
//!
//! Providers are registered explicitly by the composition root from a
//! list of descriptors; there is no global registry and no registration
//! via module initialization side effects. The registry owns the shared
//! rate limiter configuration and one circuit breaker per provider.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use stratus_core::{KindDescriptor, Scope};

use crate::breaker::CircuitBreaker;
use crate::error::{ProviderError, ProviderResult};
use crate::rate_limit::RateLimiter;
use crate::traits::Provider;

/// Factory building a provider instance at registration time.
pub type ProviderFactory = Box<dyn Fn() -> ProviderResult<Arc<dyn Provider>> + Send + Sync>;

/// Everything the composition root says about one provider.
pub struct ProviderDescriptor {
    /// Provider name; must be unique.
    pub name: String,
    /// Disabled providers are skipped at registration.
    pub enabled: bool,
    /// Outbound call ceiling for this provider.
    pub requests_per_minute: u64,
    /// Resource kinds this provider inventories.
    pub kinds: Vec<KindDescriptor>,
    /// Scopes (account × region) to cover each cycle.
    pub scopes: Vec<Scope>,
    /// Builds the provider, typically capturing configuration.
    pub factory: ProviderFactory,
}

impl ProviderDescriptor {
    /// Descriptor with the given name and factory; enabled by default.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn() -> ProviderResult<Arc<dyn Provider>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            requests_per_minute: 120,
            kinds: Vec::new(),
            scopes: Vec::new(),
            factory: Box::new(factory),
        }
    }

    /// Set the enabled flag.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the request ceiling.
    #[must_use]
    pub fn requests_per_minute(mut self, requests_per_minute: u64) -> Self {
        self.requests_per_minute = requests_per_minute;
        self
    }

    /// Set the inventoried kinds.
    #[must_use]
    pub fn kinds(mut self, kinds: Vec<KindDescriptor>) -> Self {
        self.kinds = kinds;
        self
    }

    /// Set the covered scopes.
    #[must_use]
    pub fn scopes(mut self, scopes: Vec<Scope>) -> Self {
        self.scopes = scopes;
        self
    }
}

/// A successfully registered provider with its resilience state.
pub struct RegisteredProvider {
    /// Provider name.
    pub name: String,
    /// Resource kinds this provider inventories.
    pub kinds: Vec<KindDescriptor>,
    /// Scopes to cover each cycle.
    pub scopes: Vec<Scope>,
    /// The provider instance.
    pub provider: Arc<dyn Provider>,
    /// Circuit breaker guarding this provider's calls.
    pub breaker: Arc<CircuitBreaker>,
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("name", &self.name)
            .field("kinds", &self.kinds)
            .field("scopes", &self.scopes)
            .field("provider", &"<dyn Provider>")
            .field("breaker", &self.breaker)
            .finish()
    }
}

/// Startup-time mapping of provider name to instance and policy.
pub struct ProviderRegistry {
    limiter: Arc<RateLimiter>,
    providers: BTreeMap<String, Arc<RegisteredProvider>>,
}

impl ProviderRegistry {
    /// Registry sharing the given rate limiter.
    #[must_use]
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            providers: BTreeMap::new(),
        }
    }

    /// Register one descriptor. Disabled descriptors are recorded as
    /// skipped; duplicate names are an error.
    pub fn register(&mut self, descriptor: ProviderDescriptor) -> ProviderResult<()> {
        if !descriptor.enabled {
            info!(provider = %descriptor.name, "provider disabled, skipping registration");
            return Ok(());
        }
        if self.providers.contains_key(&descriptor.name) {
            return Err(ProviderError::AlreadyRegistered {
                name: descriptor.name,
            });
        }

        let provider = (descriptor.factory)().map_err(|e| ProviderError::Construction {
            name: descriptor.name.clone(),
            message: e.to_string(),
        })?;
        self.limiter
            .set_rate(&descriptor.name, descriptor.requests_per_minute);

        info!(
            provider = %descriptor.name,
            kinds = descriptor.kinds.len(),
            scopes = descriptor.scopes.len(),
            requests_per_minute = descriptor.requests_per_minute,
            "provider registered"
        );

        self.providers.insert(
            descriptor.name.clone(),
            Arc::new(RegisteredProvider {
                breaker: Arc::new(CircuitBreaker::with_defaults(&descriptor.name)),
                name: descriptor.name,
                kinds: descriptor.kinds,
                scopes: descriptor.scopes,
                provider,
            }),
        );
        Ok(())
    }

    /// Look up a registered provider.
    pub fn get(&self, name: &str) -> ProviderResult<Arc<RegisteredProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ProviderError::NotRegistered {
                name: name.to_string(),
            })
    }

    /// All registered providers, in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredProvider>> {
        self.providers.values()
    }

    /// Number of registered providers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// The shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}
