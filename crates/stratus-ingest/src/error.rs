//! Ingestion error type.

use stratus_provider::ProviderError;
use stratus_store::StoreError;
use stratus_workflow::Retryable;

/// Error from one ingestion activity attempt.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Listing or conversion failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The reconcile transaction failed and was rolled back.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Retryable for IngestError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            // A rolled-back transaction left no partial state; retrying the
            // batch is always safe.
            Self::Store(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_provider_errors_are_retryable() {
        let err = IngestError::from(ProviderError::transient("502"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_permanent_provider_errors_are_not() {
        let err = IngestError::from(ProviderError::auth_failed("aws", "denied"));
        assert!(!err.is_retryable());

        let err = IngestError::from(ProviderError::malformed("i-001", "no name"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_errors_are_retryable() {
        let err = IngestError::from(StoreError::Backend("connection lost".to_string()));
        assert!(err.is_retryable());
    }
}
