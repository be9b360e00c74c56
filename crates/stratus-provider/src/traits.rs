//! The provider trait.

use async_trait::async_trait;
use serde_json::Value;

use stratus_core::{CanonicalRecord, KindDescriptor, Scope};
use stratus_workflow::Heartbeat;

use crate::error::ProviderResult;

/// One record as a provider's API returned it, before conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Provider-assigned identifier.
    pub external_id: String,
    /// Unparsed payload.
    pub payload: Value,
}

impl RawRecord {
    /// Wrap a raw payload.
    #[must_use]
    pub fn new(external_id: impl Into<String>, payload: Value) -> Self {
        Self {
            external_id: external_id.into(),
            payload,
        }
    }
}

/// An external inventory source.
///
/// Implementations own their SDK client and pagination; the engine only
/// ever sees the full unordered listing for a scope plus a pure
/// conversion function.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, matching its registry and configuration entries.
    fn name(&self) -> &str;

    /// Verify credentials and reachability. Called by the composition
    /// root at startup; not part of the ingestion path.
    async fn test_connection(&self) -> ProviderResult<()>;

    /// List every resource of `kind` in `scope`.
    ///
    /// Implementations paginate internally and should beat the heartbeat
    /// between pages so a hung call is detected by the activity watchdog
    /// instead of waited on indefinitely.
    async fn list(
        &self,
        kind: &KindDescriptor,
        scope: &Scope,
        heartbeat: &Heartbeat,
    ) -> ProviderResult<Vec<RawRecord>>;

    /// Convert one raw record into canonical form.
    ///
    /// Pure and deterministic; errors with
    /// [`ProviderError::Malformed`](crate::ProviderError::Malformed) on a
    /// payload that cannot be converted.
    fn convert(&self, kind: &KindDescriptor, raw: RawRecord) -> ProviderResult<CanonicalRecord>;
}
