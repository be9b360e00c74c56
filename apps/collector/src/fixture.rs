//! File-based inventory source.
//!
//! Serves scopes from JSON files on disk: one file per scope named
//! `<account>.json` or `<account>-<region>.json` under the configured
//! directory, each an array of objects with an `id`, an optional `kind`,
//! an optional `tags` object, and scalar attributes. Used for local runs
//! and smoke deployments; cloud SDK providers register through the same
//! descriptor mechanism.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use stratus_core::{CanonicalRecord, ChildItem, KindDescriptor, Scope};
use stratus_provider::{Provider, ProviderError, ProviderResult, RawRecord};
use stratus_workflow::Heartbeat;

pub struct FixtureProvider {
    name: String,
    base_dir: PathBuf,
}

impl FixtureProvider {
    pub fn new(name: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            base_dir: base_dir.into(),
        }
    }

    fn scope_file(&self, scope: &Scope) -> PathBuf {
        let file_name = match &scope.region {
            Some(region) => format!("{}-{}.json", scope.account, region),
            None => format!("{}.json", scope.account),
        };
        self.base_dir.join(file_name)
    }
}

#[async_trait]
impl Provider for FixtureProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> ProviderResult<()> {
        if self.base_dir.is_dir() {
            Ok(())
        } else {
            Err(ProviderError::MissingDependency {
                message: format!("fixture directory missing: {}", self.base_dir.display()),
            })
        }
    }

    async fn list(
        &self,
        kind: &KindDescriptor,
        scope: &Scope,
        heartbeat: &Heartbeat,
    ) -> ProviderResult<Vec<RawRecord>> {
        let path = self.scope_file(scope);
        if !path.exists() {
            debug!(scope = %scope, path = %path.display(), "no fixture file, empty scope");
            return Ok(Vec::new());
        }

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            ProviderError::transient_with_source(
                format!("reading {} failed", path.display()),
                e,
            )
        })?;
        heartbeat.beat();

        let documents: Vec<Value> =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::MissingDependency {
                message: format!("{} is not a JSON array: {e}", path.display()),
            })?;

        let mut records = Vec::new();
        for document in documents {
            let Some(id) = document.get("id").and_then(Value::as_str) else {
                return Err(ProviderError::MissingDependency {
                    message: format!("{}: record without string id", path.display()),
                });
            };
            let id = id.to_string();
            // One file may mix kinds; records without a kind tag belong to
            // every kind the provider inventories.
            let matches = document
                .get("kind")
                .and_then(Value::as_str)
                .is_none_or(|k| k == kind.kind);
            if matches {
                records.push(RawRecord::new(id, document));
            }
        }
        Ok(records)
    }

    fn convert(&self, _kind: &KindDescriptor, raw: RawRecord) -> ProviderResult<CanonicalRecord> {
        let Value::Object(payload) = raw.payload else {
            return Err(ProviderError::malformed(raw.external_id, "not a JSON object"));
        };

        let mut record = CanonicalRecord::new(raw.external_id.clone());
        for (name, value) in payload {
            match name.as_str() {
                "id" | "kind" => {}
                "tags" => {
                    let Value::Object(tags) = value else {
                        return Err(ProviderError::malformed(
                            raw.external_id.clone(),
                            "tags is not an object",
                        ));
                    };
                    let items = tags
                        .into_iter()
                        .map(|(key, value)| ChildItem::new(key, value))
                        .collect();
                    record = record.with_children("tags", items);
                }
                _ => {
                    record.attributes.insert(name, value);
                }
            }
        }
        Ok(record)
    }
}
