//! Workflow primitives for the stratus ingestion tree.
//!
//! The orchestration model is an explicit task/future abstraction: retry
//! policy is first-class configuration, activities run under a
//! start-to-close timeout with a heartbeat watchdog, and cancellation
//! propagates through a token hierarchy. Nothing here knows about
//! providers or storage; higher crates compose these primitives into the
//! inventory → provider → resource-type tree.

pub mod activity;
pub mod cancel;
pub mod retry;
pub mod status;

pub use activity::{run_activity, ActivityContext, ActivityFailure, ActivityOptions, Heartbeat};
pub use cancel::CancellationToken;
pub use retry::{RetryPolicy, Retryable};
pub use status::ExecutionStatus;
