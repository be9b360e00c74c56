//! Change detection.
//!
//! Scalar attributes are compared by equality, minus the descriptor's
//! ignored set. Child collections are compared as order-independent keyed
//! sets, each collection yielding its own changed flag so a child-only
//! change never counts as a top-level one.

use std::collections::HashMap;

use serde_json::{Map, Value};

use stratus_core::{CanonicalRecord, ChildItem, KindDescriptor};

use crate::model::StoredRecord;

/// Top-level classification of one observed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOutcome {
    /// No current row exists.
    New,
    /// A compared scalar attribute differs.
    Changed,
    /// All compared scalar attributes match.
    Unchanged,
}

/// Full diff result for one observed record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordDiff {
    /// Scalar-level classification.
    pub outcome: DiffOutcome,
    /// Child collections whose keyed item sets differ.
    pub changed_children: Vec<String>,
}

impl RecordDiff {
    /// Nothing changed at all: only `collected_at` needs to advance.
    #[must_use]
    pub fn is_write_skip(&self) -> bool {
        self.outcome == DiffOutcome::Unchanged && self.changed_children.is_empty()
    }

    /// Only child collections changed; the parent history stays open.
    #[must_use]
    pub fn is_child_only(&self) -> bool {
        self.outcome == DiffOutcome::Unchanged && !self.changed_children.is_empty()
    }
}

/// Diff an observed record against the stored current state.
#[must_use]
pub fn diff_record(
    kind: &KindDescriptor,
    observed: &CanonicalRecord,
    existing: Option<&StoredRecord>,
) -> RecordDiff {
    let Some(existing) = existing else {
        return RecordDiff {
            outcome: DiffOutcome::New,
            changed_children: Vec::new(),
        };
    };

    let outcome = if attributes_equal(kind, &observed.attributes, &existing.attributes) {
        DiffOutcome::Unchanged
    } else {
        DiffOutcome::Changed
    };

    let changed_children = kind
        .child_collections
        .iter()
        .filter(|name| !items_equal(observed.child_items(name), existing.child_items(name)))
        .map(|name| (*name).to_string())
        .collect();

    RecordDiff {
        outcome,
        changed_children,
    }
}

/// Scalar equality over the compared attribute set.
fn attributes_equal(kind: &KindDescriptor, a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
    let compared = |map: &Map<String, Value>| -> Vec<(String, Value)> {
        map.iter()
            .filter(|(name, _)| kind.compares(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect()
    };
    let mut left = compared(a);
    let mut right = compared(b);
    left.sort_by(|x, y| x.0.cmp(&y.0));
    right.sort_by(|x, y| x.0.cmp(&y.0));
    left == right
}

/// Order-independent keyed-set equality.
fn items_equal(a: &[ChildItem], b: &[ChildItem]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let keyed: HashMap<&str, &Value> = b.iter().map(|i| (i.key.as_str(), &i.value)).collect();
    a.iter()
        .all(|item| keyed.get(item.key.as_str()) == Some(&&item.value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::collections::BTreeMap;

    const KIND: KindDescriptor = KindDescriptor::new("aws_ec2_instance")
        .with_children(&["tags", "security_groups"])
        .with_ignored(&["request_id"]);

    fn stored(observed: &CanonicalRecord) -> StoredRecord {
        StoredRecord {
            resource_id: observed.resource_id.clone(),
            attributes: observed.attributes.clone(),
            children: observed.children.clone(),
            collected_at: Utc::now(),
            first_collected_at: Utc::now(),
        }
    }

    fn record() -> CanonicalRecord {
        CanonicalRecord::new("i-001")
            .with_attribute("name", json!("web-1"))
            .with_attribute("state", json!("running"))
            .with_children(
                "tags",
                vec![
                    ChildItem::new("env", json!("prod")),
                    ChildItem::new("team", json!("platform")),
                ],
            )
    }

    #[test]
    fn test_missing_record_is_new() {
        let diff = diff_record(&KIND, &record(), None);
        assert_eq!(diff.outcome, DiffOutcome::New);
    }

    #[test]
    fn test_identical_record_is_write_skip() {
        let observed = record();
        let diff = diff_record(&KIND, &observed, Some(&stored(&observed)));
        assert!(diff.is_write_skip());
    }

    #[test]
    fn test_scalar_change_is_top_level() {
        let observed = record();
        let mut existing = stored(&observed);
        existing
            .attributes
            .insert("state".to_string(), json!("stopped"));

        let diff = diff_record(&KIND, &observed, Some(&existing));
        assert_eq!(diff.outcome, DiffOutcome::Changed);
        assert!(diff.changed_children.is_empty());
    }

    #[test]
    fn test_ignored_attribute_does_not_count() {
        let observed = record().with_attribute("request_id", json!("req-1"));
        let mut existing = stored(&observed);
        existing
            .attributes
            .insert("request_id".to_string(), json!("req-2"));

        let diff = diff_record(&KIND, &observed, Some(&existing));
        assert!(diff.is_write_skip());
    }

    #[test]
    fn test_added_attribute_counts_as_change() {
        let observed = record().with_attribute("vpc_id", json!("vpc-1"));
        let existing = stored(&record());
        let diff = diff_record(&KIND, &observed, Some(&existing));
        assert_eq!(diff.outcome, DiffOutcome::Changed);
    }

    #[test]
    fn test_child_order_does_not_matter() {
        let observed = record();
        let mut existing = stored(&observed);
        existing
            .children
            .get_mut("tags")
            .unwrap()
            .reverse();

        let diff = diff_record(&KIND, &observed, Some(&existing));
        assert!(diff.is_write_skip());
    }

    #[test]
    fn test_child_value_change_is_child_only() {
        let observed = record();
        let mut existing = stored(&observed);
        existing.children.insert(
            "tags".to_string(),
            vec![
                ChildItem::new("env", json!("staging")),
                ChildItem::new("team", json!("platform")),
            ],
        );

        let diff = diff_record(&KIND, &observed, Some(&existing));
        assert_eq!(diff.outcome, DiffOutcome::Unchanged);
        assert_eq!(diff.changed_children, vec!["tags".to_string()]);
        assert!(diff.is_child_only());
    }

    #[test]
    fn test_removed_child_collection_is_detected() {
        let observed = CanonicalRecord {
            children: BTreeMap::new(),
            ..record()
        };
        let existing = stored(&record());

        let diff = diff_record(&KIND, &observed, Some(&existing));
        assert_eq!(diff.changed_children, vec!["tags".to_string()]);
    }

    #[test]
    fn test_undeclared_collections_are_not_compared() {
        let observed = record().with_children("undeclared", vec![ChildItem::new("x", json!(1))]);
        let existing = stored(&record());
        let diff = diff_record(&KIND, &observed, Some(&existing));
        assert!(diff.is_write_skip());
    }
}
