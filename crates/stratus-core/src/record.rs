//! Canonical resource records.
//!
//! Providers convert whatever their SDK returns into a [`CanonicalRecord`]:
//! a flat scalar attribute document plus named child collections (tags,
//! security-group attachments, ...). The versioning engine never sees
//! provider-specific structs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One item of a child collection, identified by a key within its parent.
///
/// Child collections are compared as order-independent keyed sets; the key
/// is whatever uniquely identifies the item under its parent (a tag key, a
/// security-group id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildItem {
    /// Key unique within the parent's collection.
    pub key: String,
    /// Item payload.
    pub value: Value,
}

impl ChildItem {
    /// Create a child item.
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }
}

/// A provider-observed resource in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    /// Provider-assigned identifier, unique within (kind, scope).
    pub resource_id: String,
    /// Flat scalar attributes describing the resource.
    pub attributes: Map<String, Value>,
    /// Child collections, keyed by collection name.
    pub children: BTreeMap<String, Vec<ChildItem>>,
}

impl CanonicalRecord {
    /// Create an empty record for the given identifier.
    #[must_use]
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            attributes: Map::new(),
            children: BTreeMap::new(),
        }
    }

    /// Set a scalar attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    /// Set a child collection wholesale.
    #[must_use]
    pub fn with_children(mut self, collection: impl Into<String>, items: Vec<ChildItem>) -> Self {
        self.children.insert(collection.into(), items);
        self
    }

    /// Items of one child collection; empty slice if absent.
    #[must_use]
    pub fn child_items(&self, collection: &str) -> &[ChildItem] {
        self.children.get(collection).map_or(&[], Vec::as_slice)
    }
}

/// Descriptor of one resource kind.
///
/// This is what collapses the per-resource-type handlers into a single
/// generic engine: the kind name, which child collections it carries, and
/// which attributes are excluded from change detection (volatile fields
/// such as provider-side request ids).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindDescriptor {
    /// Kind name, e.g. `"aws_ec2_instance"`.
    pub kind: &'static str,
    /// Names of the child collections this kind carries.
    pub child_collections: &'static [&'static str],
    /// Attributes ignored when diffing.
    pub ignored_attributes: &'static [&'static str],
}

impl KindDescriptor {
    /// Descriptor with no child collections and nothing ignored.
    #[must_use]
    pub const fn new(kind: &'static str) -> Self {
        Self {
            kind,
            child_collections: &[],
            ignored_attributes: &[],
        }
    }

    /// Declare the child collections of this kind.
    #[must_use]
    pub const fn with_children(mut self, collections: &'static [&'static str]) -> Self {
        self.child_collections = collections;
        self
    }

    /// Declare attributes excluded from comparison.
    #[must_use]
    pub const fn with_ignored(mut self, attributes: &'static [&'static str]) -> Self {
        self.ignored_attributes = attributes;
        self
    }

    /// Whether the given attribute participates in change detection.
    #[must_use]
    pub fn compares(&self, attribute: &str) -> bool {
        !self.ignored_attributes.contains(&attribute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_builder() {
        let record = CanonicalRecord::new("i-001")
            .with_attribute("name", json!("web-1"))
            .with_children("tags", vec![ChildItem::new("env", json!("prod"))]);

        assert_eq!(record.resource_id, "i-001");
        assert_eq!(record.attributes["name"], json!("web-1"));
        assert_eq!(record.child_items("tags").len(), 1);
        assert!(record.child_items("security_groups").is_empty());
    }

    #[test]
    fn test_descriptor_compares() {
        const KIND: KindDescriptor = KindDescriptor::new("aws_ec2_instance")
            .with_children(&["tags"])
            .with_ignored(&["last_seen_request_id"]);

        assert!(KIND.compares("name"));
        assert!(!KIND.compares("last_seen_request_id"));
        assert_eq!(KIND.child_collections, &["tags"]);
    }
}
