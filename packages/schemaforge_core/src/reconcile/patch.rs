//! Patch and command types consumed by the reconciliation engine

use serde_json::Value;

use crate::document::{Property, PropertyType, Section};

/// Tri-state patch field.
///
/// `Keep` means the patch says nothing about the field; `Clear` removes
/// it explicitly. The distinction is what lets a partial update leave
/// unrelated fields alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum FieldPatch<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> FieldPatch<T> {
    pub fn set(value: T) -> Self {
        FieldPatch::Set(value)
    }

    pub fn is_keep(&self) -> bool {
        matches!(self, FieldPatch::Keep)
    }

    /// Fold the patch onto the current value.
    pub fn apply(self, current: Option<T>) -> Option<T> {
        match self {
            FieldPatch::Keep => current,
            FieldPatch::Clear => None,
            FieldPatch::Set(value) => Some(value),
        }
    }
}

/// Partial update for a section. `rename` carries the new stable key;
/// the section keeps its ordinal position.
#[derive(Clone, Debug, Default)]
pub struct SectionPatch {
    pub rename: Option<String>,
    pub title: Option<String>,
    pub description: FieldPatch<String>,
    pub icon: FieldPatch<String>,
}

/// Partial update for a property.
///
/// Constraint values (`default`, `allowed`, range bounds) arrive as
/// loose JSON values and are coerced against the property's (possibly
/// just-changed) type during the merge.
#[derive(Clone, Debug, Default)]
pub struct PropertyPatch {
    pub rename: Option<String>,
    pub property_type: Option<PropertyType>,
    pub title: FieldPatch<String>,
    pub description: FieldPatch<String>,
    pub help_text: FieldPatch<String>,
    pub icon: FieldPatch<String>,
    pub format: FieldPatch<String>,
    pub hidden: Option<bool>,
    /// Membership in the enclosing section's `required` list.
    pub required: Option<bool>,
    pub default: FieldPatch<Value>,
    pub allowed: FieldPatch<Vec<Value>>,
    pub pattern: FieldPatch<String>,
    pub minimum: FieldPatch<Value>,
    pub maximum: FieldPatch<Value>,
    pub multiple_of: FieldPatch<Value>,
}

/// The typed update protocol between UI widgets and the engine.
#[derive(Clone, Debug)]
pub enum EditCommand {
    UpdateSection {
        key: String,
        patch: SectionPatch,
    },
    UpdateProperty {
        section: String,
        name: String,
        patch: PropertyPatch,
    },
    AddSection {
        key: String,
        section: Section,
    },
    AddProperty {
        section: String,
        name: String,
        property: Property,
    },
    RemoveSection {
        key: String,
    },
    RemoveProperty {
        section: String,
        name: String,
    },
}
