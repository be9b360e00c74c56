//! The provider seam.
//!
//! Everything the ingestion engine knows about an external inventory API
//! lives behind the [`Provider`] trait: list raw records for a scope,
//! convert each into canonical form. Around it sit the pieces every
//! outbound call shares: the provider-scoped [`RateLimiter`], a
//! [`CircuitBreaker`] per provider, and the [`ProviderRegistry`] the
//! composition root fills explicitly at startup.

pub mod breaker;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod traits;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use error::{ProviderError, ProviderResult};
pub use rate_limit::RateLimiter;
pub use registry::{ProviderDescriptor, ProviderRegistry, RegisteredProvider};
pub use traits::{Provider, RawRecord};
