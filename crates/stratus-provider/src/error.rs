//! Provider error taxonomy.
//!
//! Errors carry their retry classification: transient failures are retried
//! by the activity layer up to the attempt cap, permanent failures fail
//! the scope immediately, and malformed payloads abort the whole batch.

use thiserror::Error;

use stratus_workflow::Retryable;

/// Error from a provider operation.
#[derive(Debug, Error)]
pub enum ProviderError {
    // Transient failures (retried).
    /// Timeout, 5xx, connection reset and friends.
    #[error("transient provider error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider asked us to slow down (429).
    #[error("provider rate limited the request: {message}")]
    RateLimited { message: String },

    /// A listing call exceeded the provider-side deadline.
    #[error("provider call timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The provider's circuit breaker is open.
    #[error("circuit breaker open for provider {provider}")]
    CircuitOpen { provider: String },

    // Permanent failures (fail the scope).
    /// Credentials rejected.
    #[error("authentication failed for provider {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    /// A required parent object (account, project) does not exist.
    #[error("missing dependency: {message}")]
    MissingDependency { message: String },

    /// A payload could not be converted to canonical form. Aborts the
    /// batch: a partially converted batch would corrupt the diff.
    #[error("malformed record {resource_id}: {message}")]
    Malformed {
        resource_id: String,
        message: String,
    },

    /// The caller's deadline or cancellation hit while waiting for a rate
    /// limit permit.
    #[error("deadline exceeded while waiting for a rate limit permit")]
    DeadlineExceeded,

    // Registration-time failures.
    /// Two descriptors used the same provider name.
    #[error("provider {name} is already registered")]
    AlreadyRegistered { name: String },

    /// Lookup of a provider that was never registered.
    #[error("provider {name} is not registered")]
    NotRegistered { name: String },

    /// The descriptor's factory could not build the provider.
    #[error("failed to construct provider {name}: {message}")]
    Construction { name: String, message: String },
}

impl ProviderError {
    /// Whether a retry of the same call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient { .. }
                | Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::CircuitOpen { .. }
        )
    }

    /// Stable code for metrics and per-scope error reporting.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "TRANSIENT",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Timeout { .. } => "TIMEOUT",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
            Self::AuthFailed { .. } => "AUTH_FAILED",
            Self::MissingDependency { .. } => "MISSING_DEPENDENCY",
            Self::Malformed { .. } => "MALFORMED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::AlreadyRegistered { .. } => "ALREADY_REGISTERED",
            Self::NotRegistered { .. } => "NOT_REGISTERED",
            Self::Construction { .. } => "CONSTRUCTION_FAILED",
        }
    }

    // Convenience constructors.

    /// A transient error from a message.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// A transient error wrapping an SDK error.
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// An authentication failure.
    pub fn auth_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AuthFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// A conversion failure for one record.
    pub fn malformed(resource_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Malformed {
            resource_id: resource_id.into(),
            message: message.into(),
        }
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        self.is_transient()
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;
