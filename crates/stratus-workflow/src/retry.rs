//! Retry policy with exponential backoff.

use std::time::Duration;

/// Classification of errors into retryable (transient) and not.
///
/// Implemented by the error types activities return so the retry loop can
/// decide from data instead of control flow.
pub trait Retryable {
    /// Whether another attempt may succeed.
    fn is_retryable(&self) -> bool;
}

/// Backoff configuration applied uniformly to every activity.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Multiplier applied per subsequent attempt.
    pub multiplier: f64,
    /// Ceiling on the computed delay.
    pub max_delay: Duration,
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Whether to add up to 25% jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to sleep after the given failed attempt (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        #[allow(clippy::cast_precision_loss)]
        let base = self.initial_delay.as_millis() as f64
            * self.multiplier.powi(i32::try_from(exponent).unwrap_or(i32::MAX));
        #[allow(clippy::cast_precision_loss)]
        let capped = base.min(self.max_delay.as_millis() as f64);

        let final_ms = if self.jitter {
            capped * (1.0 + jitter_fraction() * 0.25)
        } else {
            capped
        };

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let millis = final_ms as u64;
        Duration::from_millis(millis)
    }
}

/// Cheap pseudo-random fraction in `[0, 1)` for jitter.
/// Not cryptographically secure; does not need to be.
fn jitter_fraction() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u64(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos()
            .into(),
    );
    #[allow(clippy::cast_precision_loss)]
    let fraction = (hasher.finish() as f64) / (u64::MAX as f64);
    fraction
}
