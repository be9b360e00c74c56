//! Provider descriptor assembly.
//!
//! The collector registers providers explicitly from configuration; there
//! is no import-side-effect registry. Cloud SDK providers plug in here by
//! adding a descriptor; the built-in file source covers providers whose
//! settings point at a fixture directory.

use std::sync::Arc;

use tracing::warn;

use stratus_config::AppConfig;
use stratus_core::KindDescriptor;
use stratus_provider::{Provider, ProviderDescriptor};

use crate::fixture::FixtureProvider;

/// Resource kinds every inventory source is asked for.
const COMPUTE_INSTANCE: KindDescriptor = KindDescriptor::new("compute_instance")
    .with_children(&["tags", "security_groups"])
    .with_ignored(&["observed_request_id"]);
const STORAGE_BUCKET: KindDescriptor =
    KindDescriptor::new("storage_bucket").with_children(&["tags"]);
const SECURITY_AGENT: KindDescriptor = KindDescriptor::new("security_agent");

fn default_kinds() -> Vec<KindDescriptor> {
    vec![COMPUTE_INSTANCE, STORAGE_BUCKET, SECURITY_AGENT]
}

/// Build one descriptor per configured provider.
pub fn descriptors(config: &AppConfig) -> Vec<ProviderDescriptor> {
    let mut descriptors = Vec::new();
    for (name, settings) in &config.providers {
        let Some(fixture_dir) = settings.fixture_dir.clone() else {
            warn!(
                provider = %name,
                "no inventory source wired for this provider, skipping"
            );
            continue;
        };

        let provider_name = name.clone();
        descriptors.push(
            ProviderDescriptor::new(name.clone(), move || {
                Ok(Arc::new(FixtureProvider::new(
                    provider_name.clone(),
                    fixture_dir.clone(),
                )) as Arc<dyn Provider>)
            })
            .enabled(settings.enabled)
            .requests_per_minute(settings.requests_per_minute)
            .kinds(default_kinds())
            .scopes(settings.scopes(name)),
        );
    }
    descriptors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(toml: &str) -> AppConfig {
        let mut full = String::from("[database]\nurl = \"postgres://localhost/inv\"\n\n");
        full.push_str(toml);
        toml_config(&full)
    }

    fn toml_config(body: &str) -> AppConfig {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stratus.toml");
        std::fs::write(&path, body).unwrap();
        use stratus_config::{ConfigBackend, FileBackend};
        FileBackend::new(path).load().unwrap()
    }

    #[test]
    fn test_provider_without_source_is_skipped() {
        let config = config("[providers.aws]\naccounts = [\"111\"]\n");
        assert!(descriptors(&config).is_empty());
    }

    #[test]
    fn test_fixture_provider_descriptor() {
        let config = config(
            "[providers.lab]\naccounts = [\"acct-1\"]\nregions = [\"us-east-1\"]\nfixture_dir = \"/srv/fixtures\"\nrequests_per_minute = 30\n",
        );
        let descriptors = descriptors(&config);
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].name, "lab");
        assert_eq!(descriptors[0].requests_per_minute, 30);
        assert_eq!(descriptors[0].scopes.len(), 1);
        assert_eq!(descriptors[0].kinds.len(), 3);

        let provider = (descriptors[0].factory)().unwrap();
        assert_eq!(provider.name(), "lab");
    }

    #[test]
    fn test_disabled_flag_carries_through() {
        let config = config(
            "[providers.lab]\nenabled = false\naccounts = [\"acct-1\"]\nfixture_dir = \"/srv/fixtures\"\n",
        );
        let descriptors = descriptors(&config);
        assert!(!descriptors[0].enabled);
    }
}
