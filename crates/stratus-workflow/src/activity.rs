//! Retryable activity execution.
//!
//! [`run_activity`] drives one logical activity through its attempt loop:
//! each attempt runs under a start-to-close timeout and, when configured, a
//! heartbeat watchdog, so a hung listing call is detected instead of
//! waited on indefinitely. Transient failures are retried per the policy;
//! cancellation wins over everything.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::retry::{RetryPolicy, Retryable};

/// Per-activity execution limits.
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    /// Maximum wall-clock time for one attempt.
    pub start_to_close: Duration,
    /// Maximum silence between heartbeats before the attempt is failed.
    /// `None` disables the watchdog.
    pub heartbeat_timeout: Option<Duration>,
    /// Backoff applied between attempts.
    pub retry: RetryPolicy,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(300),
            heartbeat_timeout: Some(Duration::from_secs(60)),
            retry: RetryPolicy::default(),
        }
    }
}

/// Handle an activity uses to signal liveness from inside long calls.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    tx: Arc<watch::Sender<Instant>>,
}

impl Heartbeat {
    /// Record a heartbeat now.
    pub fn beat(&self) {
        let _ = self.tx.send(Instant::now());
    }

    /// A heartbeat nobody listens to, for calling provider code outside an
    /// activity (startup checks, tests).
    #[must_use]
    pub fn noop() -> Self {
        let (tx, _rx) = watch::channel(Instant::now());
        Self { tx: Arc::new(tx) }
    }
}

/// Execution context handed to each activity attempt.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    heartbeat: Heartbeat,
    cancel: CancellationToken,
}

impl ActivityContext {
    /// Record a heartbeat now.
    pub fn record_heartbeat(&self) {
        self.heartbeat.beat();
    }

    /// A clonable heartbeat handle to pass into long-running calls.
    #[must_use]
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    /// The cancellation token governing this attempt.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Why an activity ultimately failed.
#[derive(Debug, thiserror::Error)]
pub enum ActivityFailure<E> {
    /// One attempt exceeded its start-to-close timeout.
    #[error("activity '{name}' timed out after {elapsed:?}")]
    Timeout {
        /// Activity name.
        name: String,
        /// Configured start-to-close limit.
        elapsed: Duration,
    },

    /// The heartbeat watchdog saw no liveness signal in time.
    #[error("activity '{name}' heartbeat lost after {idle:?}")]
    HeartbeatLost {
        /// Activity name.
        name: String,
        /// Configured heartbeat limit.
        idle: Duration,
    },

    /// Cancellation was requested before or during the attempt.
    #[error("activity '{name}' cancelled")]
    Cancelled {
        /// Activity name.
        name: String,
    },

    /// The activity itself returned an error on its final attempt.
    #[error("activity '{name}' failed: {source}")]
    App {
        /// Activity name.
        name: String,
        /// The activity's error.
        source: E,
    },
}

impl<E> ActivityFailure<E> {
    fn attempt_retryable(&self) -> bool
    where
        E: Retryable,
    {
        match self {
            // A hang or timeout is transient by definition.
            Self::Timeout { .. } | Self::HeartbeatLost { .. } => true,
            Self::Cancelled { .. } => false,
            Self::App { source, .. } => source.is_retryable(),
        }
    }

    /// Whether the failure was a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Run one logical activity through its retry loop.
///
/// `attempt_fn` is invoked once per attempt with a fresh [`ActivityContext`];
/// the future it returns is raced against cancellation, the start-to-close
/// timeout, and the heartbeat watchdog.
pub async fn run_activity<T, E, F, Fut>(
    name: &str,
    options: &ActivityOptions,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T, ActivityFailure<E>>
where
    E: Retryable + std::fmt::Display,
    F: FnMut(ActivityContext) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = options.retry.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(ActivityFailure::Cancelled { name: name.into() });
        }

        let (hb_tx, hb_rx) = watch::channel(Instant::now());
        let ctx = ActivityContext {
            heartbeat: Heartbeat {
                tx: Arc::new(hb_tx),
            },
            cancel: cancel.clone(),
        };

        let failure = match supervise(name, options, cancel, hb_rx, attempt_fn(ctx)).await {
            Ok(value) => {
                debug!(activity = name, attempt, "activity completed");
                return Ok(value);
            }
            Err(failure) => failure,
        };

        if attempt < max_attempts && failure.attempt_retryable() {
            let delay = options.retry.delay_for(attempt);
            warn!(
                activity = name,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis(),
                error = %failure,
                "activity attempt failed, retrying"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = cancel.cancelled() => {
                    return Err(ActivityFailure::Cancelled { name: name.into() });
                }
            }
        } else {
            return Err(failure);
        }
    }

    unreachable!("attempt loop returns on success or final failure")
}

/// Race one attempt against cancellation, timeout, and the watchdog.
async fn supervise<T, E>(
    name: &str,
    options: &ActivityOptions,
    cancel: &CancellationToken,
    hb_rx: watch::Receiver<Instant>,
    attempt: impl Future<Output = Result<T, E>>,
) -> Result<T, ActivityFailure<E>> {
    tokio::pin!(attempt);

    tokio::select! {
        result = &mut attempt => result.map_err(|source| ActivityFailure::App {
            name: name.into(),
            source,
        }),
        () = cancel.cancelled() => Err(ActivityFailure::Cancelled { name: name.into() }),
        () = tokio::time::sleep(options.start_to_close) => Err(ActivityFailure::Timeout {
            name: name.into(),
            elapsed: options.start_to_close,
        }),
        idle = heartbeat_watchdog(hb_rx, options.heartbeat_timeout) => {
            Err(ActivityFailure::HeartbeatLost { name: name.into(), idle })
        }
    }
}

/// Resolve when no heartbeat arrives within `timeout`. Never resolves when
/// the watchdog is disabled.
async fn heartbeat_watchdog(
    mut rx: watch::Receiver<Instant>,
    timeout: Option<Duration>,
) -> Duration {
    let Some(timeout) = timeout else {
        std::future::pending::<()>().await;
        unreachable!()
    };

    loop {
        let last = *rx.borrow_and_update();
        tokio::select! {
            () = tokio::time::sleep_until(last + timeout) => {
                if *rx.borrow() == last {
                    return timeout;
                }
            }
            changed = rx.changed() => {
                if changed.is_err() {
                    // Attempt future dropped its context; it can no longer hang.
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("flaky")]
        Flaky,
        #[error("fatal")]
        Fatal,
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Flaky)
        }
    }

    fn fast_options() -> ActivityOptions {
        ActivityOptions {
            start_to_close: Duration::from_millis(200),
            heartbeat_timeout: None,
            retry: RetryPolicy {
                initial_delay: Duration::from_millis(1),
                multiplier: 2.0,
                max_delay: Duration::from_millis(10),
                max_attempts: 3,
                jitter: false,
            },
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_attempt() {
        let cancel = CancellationToken::new();
        let result: Result<i32, _> =
            run_activity("list", &fast_options(), &cancel, |_ctx| async {
                Ok::<_, TestError>(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result = run_activity("list", &fast_options(), &cancel, |_ctx| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(TestError::Flaky)
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = run_activity("list", &fast_options(), &cancel, |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Fatal) }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            ActivityFailure::App {
                source: TestError::Fatal,
                ..
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let cancel = CancellationToken::new();
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = run_activity("list", &fast_options(), &cancel, |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(TestError::Flaky) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), ActivityFailure::App { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out() {
        let cancel = CancellationToken::new();
        let options = ActivityOptions {
            retry: RetryPolicy::no_retries(),
            ..fast_options()
        };

        let result: Result<(), ActivityFailure<TestError>> =
            run_activity("list", &options, &cancel, |_ctx| async {
                std::future::pending().await
            })
            .await;

        assert!(matches!(result.unwrap_err(), ActivityFailure::Timeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_heartbeat_fails_attempt() {
        let cancel = CancellationToken::new();
        let options = ActivityOptions {
            start_to_close: Duration::from_secs(3600),
            heartbeat_timeout: Some(Duration::from_millis(50)),
            retry: RetryPolicy::no_retries(),
        };

        let result: Result<(), ActivityFailure<TestError>> =
            run_activity("list", &options, &cancel, |ctx| async move {
                ctx.record_heartbeat();
                std::future::pending().await
            })
            .await;

        assert!(matches!(
            result.unwrap_err(),
            ActivityFailure::HeartbeatLost { .. }
        ));
    }

    #[tokio::test]
    async fn test_heartbeats_keep_slow_attempt_alive() {
        let cancel = CancellationToken::new();
        let options = ActivityOptions {
            start_to_close: Duration::from_secs(5),
            heartbeat_timeout: Some(Duration::from_millis(80)),
            retry: RetryPolicy::no_retries(),
        };

        let result = run_activity("list", &options, &cancel, |ctx| async move {
            // Simulates paginated listing: slow overall, but beating between pages.
            for _ in 0..5 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                ctx.record_heartbeat();
            }
            Ok::<_, TestError>("done")
        })
        .await;

        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_attempt() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let options = ActivityOptions {
            start_to_close: Duration::from_secs(3600),
            heartbeat_timeout: None,
            retry: RetryPolicy::default(),
        };
        let result: Result<(), ActivityFailure<TestError>> =
            run_activity("list", &options, &cancel, |_ctx| async {
                std::future::pending().await
            })
            .await;

        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_pre_cancelled_token_skips_work() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = AtomicUsize::new(0);

        let result: Result<(), _> = run_activity("list", &fast_options(), &cancel, |_ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, TestError>(()) }
        })
        .await;

        assert!(matches!(result, Err(ActivityFailure::Cancelled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
