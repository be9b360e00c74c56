//! Core types shared across the stratus inventory platform.
//!
//! This crate carries the vocabulary every other crate speaks: strongly
//! typed identifiers, the [`Scope`] a batch of resources belongs to, and
//! the [`CanonicalRecord`] shape providers hand to the versioning engine.

pub mod ids;
pub mod record;
pub mod scope;

pub use ids::{HistoryId, ParseIdError, RunId};
pub use record::{CanonicalRecord, ChildItem, KindDescriptor};
pub use scope::Scope;
