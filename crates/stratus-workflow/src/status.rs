//! Execution state machine.

use serde::{Deserialize, Serialize};

/// Lifecycle of a workflow or activity execution.
///
/// Scheduled → Running → {Completed | Failed | Cancelled}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Accepted but not yet started.
    Scheduled,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Retries exhausted or a permanent error was hit.
    Failed,
    /// Cancelled by the parent or by operator request.
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a cancellation request is still meaningful.
    #[must_use]
    pub fn can_cancel(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("unknown execution status: {s}")),
        }
    }
}
