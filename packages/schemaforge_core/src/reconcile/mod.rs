//! Update reconciliation
//!
//! Edits arrive from the UI as typed commands carrying partial patches.
//! The engine merges a patch into a snapshot of the canonical document,
//! preserving sibling entries, insertion order, and renamed-key
//! positions, and rejects the whole merge if any invariant would break.

mod engine;
mod patch;

pub use engine::{
    apply_command, merge_property_update, merge_section_update, ReconcileError,
};
pub use patch::{EditCommand, FieldPatch, PropertyPatch, SectionPatch};
