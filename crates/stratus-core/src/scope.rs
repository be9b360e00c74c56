//! Scope model.
//!
//! A [`Scope`] is the isolation unit for ingestion batches and staleness
//! sweeps: one provider account (or project), optionally narrowed to a
//! region. Workflow failures are contained to their scope.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The account/region slice of a provider one batch covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    /// Provider name, e.g. `"aws"` or `"sentinelone"`.
    pub provider: String,
    /// Account, project, or site identifier within the provider.
    pub account: String,
    /// Region, for providers that partition inventory regionally.
    pub region: Option<String>,
}

impl Scope {
    /// Create an account-wide scope.
    #[must_use]
    pub fn new(provider: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            account: account.into(),
            region: None,
        }
    }

    /// Narrow the scope to one region.
    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Stable key used for map lookups and log correlation.
    #[must_use]
    pub fn key(&self) -> String {
        match &self.region {
            Some(region) => format!("{}/{}/{}", self.provider, self.account, region),
            None => format!("{}/{}", self.provider, self.account),
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_without_region() {
        let scope = Scope::new("aws", "123456789012");
        assert_eq!(scope.key(), "aws/123456789012");
        assert_eq!(scope.to_string(), "aws/123456789012");
    }

    #[test]
    fn test_key_with_region() {
        let scope = Scope::new("aws", "123456789012").with_region("us-east-1");
        assert_eq!(scope.key(), "aws/123456789012/us-east-1");
    }

    #[test]
    fn test_regional_scopes_are_distinct() {
        let a = Scope::new("gcp", "proj-1").with_region("europe-west1");
        let b = Scope::new("gcp", "proj-1").with_region("europe-west4");
        assert_ne!(a, b);
    }
}
