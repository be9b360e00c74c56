//! Live configuration for the stratus collector.
//!
//! A [`ConfigService`] loads an [`AppConfig`] snapshot from a pluggable
//! [`ConfigBackend`] (environment variables or a TOML file), keeps it
//! behind a read-write lock, and re-broadcasts on backend change
//! notifications. Readers never block each other; a reload holds the
//! write lock only for the pointer swap.

pub mod backend;
pub mod model;
pub mod service;

pub use backend::{ConfigBackend, EnvBackend, FileBackend, WatchGuard};
pub use model::{AppConfig, DatabaseConfig, ProviderSettings};
pub use service::ConfigService;

/// Errors returned by configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The backend could not be read at all.
    #[error("failed to read configuration from {source_name}: {detail}")]
    Load {
        /// Backend name.
        source_name: &'static str,
        /// What went wrong.
        detail: String,
    },

    /// The backend was read but its content does not parse.
    #[error("invalid configuration: {detail}")]
    Parse {
        /// What went wrong.
        detail: String,
    },

    /// Setting up change notifications failed.
    #[error("failed to watch configuration source: {detail}")]
    Watch {
        /// What went wrong.
        detail: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
