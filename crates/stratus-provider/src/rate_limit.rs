//! Provider-scoped rate limiting.
//!
//! Every outbound provider call goes through [`RateLimiter::acquire`],
//! which parks until a token-bucket permit for that provider is
//! available. Ceilings come from live configuration and can be adjusted
//! on reload without restarting: the bucket is rebuilt and waiters pick
//! up the new rate on their next poll.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use stratus_workflow::CancellationToken;

use crate::error::{ProviderError, ProviderResult};

/// Token bucket: capacity tokens, refilled continuously from elapsed time.
#[derive(Debug)]
struct TokenBucket {
    capacity: u64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket sized for N requests per minute.
    fn per_minute(requests_per_minute: u64) -> Self {
        let capacity = requests_per_minute.max(1);
        Self {
            capacity,
            #[allow(clippy::cast_precision_loss)]
            refill_per_sec: capacity as f64 / 60.0,
            state: Mutex::new(BucketState {
                #[allow(clippy::cast_precision_loss)]
                available: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token if available.
    fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let ceiling = self.capacity as f64;
        state.available = (state.available + elapsed * self.refill_per_sec).min(ceiling);
        state.last_refill = now;

        if state.available >= 1.0 {
            state.available -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (floor).
    fn available(&self) -> u64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let whole = state.available.floor() as u64;
        whole
    }
}

/// Shared limiter holding one bucket per provider.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
    poll_interval: Duration,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// Empty limiter; providers get buckets via [`Self::set_rate`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Install or replace the bucket for a provider.
    ///
    /// Called at registration and again from the configuration reload
    /// callback; waiters observe the new rate on their next poll.
    pub fn set_rate(&self, provider: &str, requests_per_minute: u64) {
        let mut buckets = self.buckets.write().unwrap_or_else(|e| e.into_inner());
        let existing = buckets.get(provider).map(|b| b.capacity);
        if existing == Some(requests_per_minute.max(1)) {
            return;
        }
        info!(
            provider,
            requests_per_minute,
            previous = existing,
            "rate limit configured"
        );
        buckets.insert(
            provider.to_string(),
            Arc::new(TokenBucket::per_minute(requests_per_minute)),
        );
    }

    fn bucket(&self, provider: &str) -> Option<Arc<TokenBucket>> {
        self.buckets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(provider)
            .cloned()
    }

    /// Take one permit without waiting.
    #[must_use]
    pub fn try_acquire(&self, provider: &str) -> bool {
        // An unconfigured provider is unthrottled.
        self.bucket(provider).is_none_or(|b| b.try_acquire())
    }

    /// Take one permit, parking until one is available.
    ///
    /// Fails with [`ProviderError::DeadlineExceeded`] when the caller's
    /// cancellation token fires first.
    pub async fn acquire(&self, provider: &str, cancel: &CancellationToken) -> ProviderResult<()> {
        let mut waited = false;
        loop {
            // Re-resolve the bucket every round so a reload-time rate
            // change applies to parked waiters too.
            if self.try_acquire(provider) {
                if waited {
                    debug!(provider, "rate limit permit acquired after waiting");
                }
                return Ok(());
            }
            waited = true;
            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                () = cancel.cancelled() => return Err(ProviderError::DeadlineExceeded),
            }
        }
    }

    /// Permits currently available for a provider; `None` if unthrottled.
    #[must_use]
    pub fn available(&self, provider: &str) -> Option<u64> {
        self.bucket(provider).map(|b| b.available())
    }
}
