//! Stored record shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use stratus_core::ChildItem;

/// The current-state row for one live resource, children included.
///
/// At most one exists per (kind, scope, `resource_id`). It is rewritten on
/// every cycle that observes a change and deleted by the staleness sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Provider-assigned identifier.
    pub resource_id: String,
    /// Scalar attribute document.
    pub attributes: Map<String, Value>,
    /// Child collections, keyed by collection name. Absent and empty are
    /// equivalent.
    pub children: BTreeMap<String, Vec<ChildItem>>,
    /// When the resource was last observed.
    pub collected_at: DateTime<Utc>,
    /// When the resource was first observed. Never changes afterwards.
    pub first_collected_at: DateTime<Utc>,
}

impl StoredRecord {
    /// Items of one child collection; empty slice if absent.
    #[must_use]
    pub fn child_items(&self, collection: &str) -> &[ChildItem] {
        self.children.get(collection).map_or(&[], Vec::as_slice)
    }
}
