//! The merge engine
//!
//! All merges are pure: they take a snapshot, produce a candidate
//! document, and validate it as a whole. A failed merge returns the
//! specific error and the caller's document is untouched.

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use crate::document::{
    validate, InvariantViolation, Property, PropertyType, SchemaDocument, TypeConstraints,
};

use super::patch::{EditCommand, FieldPatch, PropertyPatch, SectionPatch};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReconcileError {
    #[error("Invalid document: {0}")]
    InvalidDocument(#[from] InvariantViolation),

    #[error("Key `{key}` already exists")]
    DuplicateKey { key: String },

    #[error("No section `{key}` in document")]
    UnknownSection { key: String },

    #[error("No property `{name}` in section `{section}`")]
    UnknownProperty { section: String, name: String },

    #[error("Value `{value}` is not coercible to {expected} at `{path}`")]
    ValueNotCoercible {
        path: String,
        expected: PropertyType,
        value: Value,
    },

    #[error("`{field}` does not apply to {property_type} properties at `{path}`")]
    FieldNotApplicable {
        path: String,
        field: &'static str,
        property_type: PropertyType,
    },
}

/// Merge a section patch into the document.
///
/// A rename substitutes the new key at the old key's ordinal position;
/// every other section and all section contents are untouched.
pub fn merge_section_update(
    doc: &SchemaDocument,
    key: &str,
    patch: &SectionPatch,
) -> Result<SchemaDocument, ReconcileError> {
    let mut next = doc.clone();
    if !next.sections.contains_key(key) {
        return Err(ReconcileError::UnknownSection {
            key: key.to_string(),
        });
    }

    let target_key = patch.rename.clone().unwrap_or_else(|| key.to_string());
    if target_key != key {
        if next.sections.contains_key(&target_key) {
            return Err(ReconcileError::DuplicateKey { key: target_key });
        }
        next.sections = rekey(std::mem::take(&mut next.sections), key, &target_key);
    }

    let section = next
        .sections
        .get_mut(&target_key)
        .ok_or_else(|| ReconcileError::UnknownSection {
            key: target_key.clone(),
        })?;

    if let Some(title) = &patch.title {
        section.title = title.clone();
    }
    section.description = patch.description.clone().apply(section.description.take());
    section.icon = patch.icon.clone().apply(section.icon.take());

    validate(&next)?;
    Ok(next)
}

/// Merge a property patch into the document.
///
/// Renames keep the property's position in both the property map and
/// the section's `required` list. A `property_type` change swaps the
/// constraint class first, then the patch's constraint fields are
/// coerced against the new type.
pub fn merge_property_update(
    doc: &SchemaDocument,
    section_key: &str,
    name: &str,
    patch: &PropertyPatch,
) -> Result<SchemaDocument, ReconcileError> {
    let mut next = doc.clone();
    let section =
        next.sections
            .get_mut(section_key)
            .ok_or_else(|| ReconcileError::UnknownSection {
                key: section_key.to_string(),
            })?;

    if !section.properties.contains_key(name) {
        return Err(ReconcileError::UnknownProperty {
            section: section_key.to_string(),
            name: name.to_string(),
        });
    }

    let target_name = patch.rename.clone().unwrap_or_else(|| name.to_string());
    if target_name != name {
        if section.properties.contains_key(&target_name) {
            return Err(ReconcileError::DuplicateKey { key: target_name });
        }
        section.properties = rekey(std::mem::take(&mut section.properties), name, &target_name);
        for entry in section.required.iter_mut() {
            if entry.as_str() == name {
                *entry = target_name.clone();
            }
        }
    }

    let path = format!("{section_key}.{target_name}");
    let property =
        section
            .properties
            .get_mut(&target_name)
            .ok_or_else(|| ReconcileError::UnknownProperty {
                section: section_key.to_string(),
                name: target_name.clone(),
            })?;

    let current_type = property.property_type();
    let next_type = patch.property_type.unwrap_or(current_type);
    if next_type != current_type {
        property.constraints = migrate_constraints(property.constraints.clone(), next_type);
    }

    property.title = patch.title.clone().apply(property.title.take());
    property.description = patch.description.clone().apply(property.description.take());
    property.help_text = patch.help_text.clone().apply(property.help_text.take());
    property.icon = patch.icon.clone().apply(property.icon.take());
    property.format = patch.format.clone().apply(property.format.take());
    if let Some(hidden) = patch.hidden {
        property.hidden = hidden;
    }

    apply_constraint_patches(property, patch, &path)?;

    if let Some(required) = patch.required {
        if required {
            if !section.required.iter().any(|entry| entry == &target_name) {
                section.required.push(target_name.clone());
            }
        } else {
            section.required.retain(|entry| entry != &target_name);
        }
    }

    validate(&next)?;
    Ok(next)
}

/// Apply a typed edit command, producing the candidate document.
pub fn apply_command(
    doc: &SchemaDocument,
    command: &EditCommand,
) -> Result<SchemaDocument, ReconcileError> {
    match command {
        EditCommand::UpdateSection { key, patch } => merge_section_update(doc, key, patch),
        EditCommand::UpdateProperty {
            section,
            name,
            patch,
        } => merge_property_update(doc, section, name, patch),
        EditCommand::AddSection { key, section } => {
            let mut next = doc.clone();
            if next.sections.contains_key(key) {
                return Err(ReconcileError::DuplicateKey { key: key.clone() });
            }
            next.sections.insert(key.clone(), section.clone());
            validate(&next)?;
            Ok(next)
        }
        EditCommand::AddProperty {
            section,
            name,
            property,
        } => {
            let mut next = doc.clone();
            let target =
                next.sections
                    .get_mut(section)
                    .ok_or_else(|| ReconcileError::UnknownSection {
                        key: section.clone(),
                    })?;
            if target.properties.contains_key(name) {
                return Err(ReconcileError::DuplicateKey { key: name.clone() });
            }
            target.properties.insert(name.clone(), property.clone());
            validate(&next)?;
            Ok(next)
        }
        EditCommand::RemoveSection { key } => {
            let mut next = doc.clone();
            if next.sections.shift_remove(key).is_none() {
                return Err(ReconcileError::UnknownSection { key: key.clone() });
            }
            validate(&next)?;
            Ok(next)
        }
        EditCommand::RemoveProperty { section, name } => {
            let mut next = doc.clone();
            let target =
                next.sections
                    .get_mut(section)
                    .ok_or_else(|| ReconcileError::UnknownSection {
                        key: section.clone(),
                    })?;
            if target.properties.shift_remove(name).is_none() {
                return Err(ReconcileError::UnknownProperty {
                    section: section.clone(),
                    name: name.clone(),
                });
            }
            target.required.retain(|entry| entry != name);
            validate(&next)?;
            Ok(next)
        }
    }
}

/// Rebuild an ordered map with `old` replaced by `new` at the same
/// ordinal position.
fn rekey<V>(map: IndexMap<String, V>, old: &str, new: &str) -> IndexMap<String, V> {
    map.into_iter()
        .map(|(key, value)| {
            if key == old {
                (new.to_string(), value)
            } else {
                (key, value)
            }
        })
        .collect()
}

/// Carry constraints across a type change. Number and integer share the
/// numeric class, so their constraints convert (floats only when
/// exact); any other change starts from an empty constraint set.
fn migrate_constraints(current: TypeConstraints, target: PropertyType) -> TypeConstraints {
    match (current, target) {
        (
            TypeConstraints::Number {
                default,
                allowed,
                minimum,
                maximum,
                multiple_of,
            },
            PropertyType::Integer,
        ) => TypeConstraints::Integer {
            default: default.and_then(exact_i64),
            allowed: allowed
                .map(|entries| entries.into_iter().filter_map(exact_i64).collect::<Vec<_>>())
                .filter(|entries| !entries.is_empty()),
            minimum: minimum.and_then(exact_i64),
            maximum: maximum.and_then(exact_i64),
            multiple_of: multiple_of.and_then(exact_i64),
        },
        (
            TypeConstraints::Integer {
                default,
                allowed,
                minimum,
                maximum,
                multiple_of,
            },
            PropertyType::Number,
        ) => TypeConstraints::Number {
            default: default.map(|v| v as f64),
            allowed: allowed.map(|entries| entries.into_iter().map(|v| v as f64).collect()),
            minimum: minimum.map(|v| v as f64),
            maximum: maximum.map(|v| v as f64),
            multiple_of: multiple_of.map(|v| v as f64),
        },
        (_, target) => TypeConstraints::empty(target),
    }
}

fn exact_i64(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

fn apply_constraint_patches(
    property: &mut Property,
    patch: &PropertyPatch,
    path: &str,
) -> Result<(), ReconcileError> {
    let property_type = property.property_type();
    match &mut property.constraints {
        TypeConstraints::String {
            default,
            allowed,
            pattern,
        } => {
            reject_inapplicable(&patch.minimum, path, "minimum", property_type)?;
            reject_inapplicable(&patch.maximum, path, "maximum", property_type)?;
            reject_inapplicable(&patch.multiple_of, path, "multipleOf", property_type)?;
            *default = apply_value(&patch.default, default.take(), path, coerce_string)?;
            *allowed = apply_values(&patch.allowed, allowed.take(), path, coerce_string)?;
            *pattern = patch.pattern.clone().apply(pattern.take());
        }
        TypeConstraints::Number {
            default,
            allowed,
            minimum,
            maximum,
            multiple_of,
        } => {
            reject_inapplicable(&patch.pattern, path, "pattern", property_type)?;
            *default = apply_value(&patch.default, default.take(), path, coerce_f64)?;
            *allowed = apply_values(&patch.allowed, allowed.take(), path, coerce_f64)?;
            *minimum = apply_value(&patch.minimum, minimum.take(), path, coerce_f64)?;
            *maximum = apply_value(&patch.maximum, maximum.take(), path, coerce_f64)?;
            *multiple_of = apply_value(&patch.multiple_of, multiple_of.take(), path, coerce_f64)?;
        }
        TypeConstraints::Integer {
            default,
            allowed,
            minimum,
            maximum,
            multiple_of,
        } => {
            reject_inapplicable(&patch.pattern, path, "pattern", property_type)?;
            *default = apply_value(&patch.default, default.take(), path, coerce_i64)?;
            *allowed = apply_values(&patch.allowed, allowed.take(), path, coerce_i64)?;
            *minimum = apply_value(&patch.minimum, minimum.take(), path, coerce_i64)?;
            *maximum = apply_value(&patch.maximum, maximum.take(), path, coerce_i64)?;
            *multiple_of = apply_value(&patch.multiple_of, multiple_of.take(), path, coerce_i64)?;
        }
        TypeConstraints::Boolean { default } => {
            reject_inapplicable(&patch.pattern, path, "pattern", property_type)?;
            reject_inapplicable(&patch.minimum, path, "minimum", property_type)?;
            reject_inapplicable(&patch.maximum, path, "maximum", property_type)?;
            reject_inapplicable(&patch.multiple_of, path, "multipleOf", property_type)?;
            reject_inapplicable(&patch.allowed, path, "enum", property_type)?;
            *default = apply_value(&patch.default, default.take(), path, coerce_bool)?;
        }
    }
    Ok(())
}

fn reject_inapplicable<T>(
    patch: &FieldPatch<T>,
    path: &str,
    field: &'static str,
    property_type: PropertyType,
) -> Result<(), ReconcileError> {
    // Clear on a field the type doesn't carry is a no-op, not an error
    if matches!(patch, FieldPatch::Set(_)) {
        return Err(ReconcileError::FieldNotApplicable {
            path: path.to_string(),
            field,
            property_type,
        });
    }
    Ok(())
}

fn apply_value<T>(
    patch: &FieldPatch<Value>,
    current: Option<T>,
    path: &str,
    coerce: fn(&Value, &str) -> Result<T, ReconcileError>,
) -> Result<Option<T>, ReconcileError> {
    match patch {
        FieldPatch::Keep => Ok(current),
        FieldPatch::Clear => Ok(None),
        FieldPatch::Set(value) => Ok(Some(coerce(value, path)?)),
    }
}

fn apply_values<T>(
    patch: &FieldPatch<Vec<Value>>,
    current: Option<Vec<T>>,
    path: &str,
    coerce: fn(&Value, &str) -> Result<T, ReconcileError>,
) -> Result<Option<Vec<T>>, ReconcileError> {
    match patch {
        FieldPatch::Keep => Ok(current),
        FieldPatch::Clear => Ok(None),
        FieldPatch::Set(values) => {
            let mut coerced = Vec::with_capacity(values.len());
            for value in values {
                coerced.push(coerce(value, path)?);
            }
            Ok(Some(coerced))
        }
    }
}

fn not_coercible(path: &str, expected: PropertyType, value: &Value) -> ReconcileError {
    ReconcileError::ValueNotCoercible {
        path: path.to_string(),
        expected,
        value: value.clone(),
    }
}

fn coerce_string(value: &Value, path: &str) -> Result<String, ReconcileError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(not_coercible(path, PropertyType::String, value)),
    }
}

fn coerce_f64(value: &Value, path: &str) -> Result<f64, ReconcileError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| not_coercible(path, PropertyType::Number, value)),
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|_| not_coercible(path, PropertyType::Number, value)),
        _ => Err(not_coercible(path, PropertyType::Number, value)),
    }
}

fn coerce_i64(value: &Value, path: &str) -> Result<i64, ReconcileError> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().and_then(exact_i64))
            .ok_or_else(|| not_coercible(path, PropertyType::Integer, value)),
        Value::String(s) => s
            .parse::<i64>()
            .map_err(|_| not_coercible(path, PropertyType::Integer, value)),
        _ => Err(not_coercible(path, PropertyType::Integer, value)),
    }
}

fn coerce_bool(value: &Value, path: &str) -> Result<bool, ReconcileError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        _ => Err(not_coercible(path, PropertyType::Boolean, value)),
    }
}
