//! Whole-document invariant checking and key-path addressing

use regex::Regex;
use thiserror::Error;

use super::model::{PropertyType, SchemaDocument, TypeConstraints, DRAFT_07, DRAFT_2020_12};

/// A violated document invariant: the kind plus the offending key path.
///
/// Paths are `section` for section-level findings and `section.property`
/// for property-level ones.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("Unsupported schema dialect `{dialect}`")]
    UnsupportedDialect { dialect: String },

    #[error("Required entry `{name}` has no matching property in section `{section}`")]
    RequiredNotDefined { section: String, name: String },

    #[error("Minimum {minimum} exceeds maximum {maximum} at `{path}`")]
    InvertedRange {
        path: String,
        minimum: f64,
        maximum: f64,
    },

    #[error("multipleOf must be positive, got {multiple_of} at `{path}`")]
    NonPositiveMultiple { path: String, multiple_of: f64 },

    #[error("{bound} {value} is not a multiple of {multiple_of} at `{path}`")]
    NotAMultiple {
        path: String,
        bound: &'static str,
        value: f64,
        multiple_of: f64,
    },

    #[error("Invalid pattern `{pattern}` at `{path}`: {reason}")]
    BadPattern {
        path: String,
        pattern: String,
        reason: String,
    },

    #[error("Default `{value}` does not match pattern `{pattern}` at `{path}`")]
    DefaultOutsidePattern {
        path: String,
        value: String,
        pattern: String,
    },

    #[error("Enum entry `{value}` does not match pattern `{pattern}` at `{path}`")]
    EnumOutsidePattern {
        path: String,
        value: String,
        pattern: String,
    },
}

/// Check every invariant, returning the first violation found.
///
/// A document either satisfies all invariants or is rejected; there is
/// no partial success.
pub fn validate(doc: &SchemaDocument) -> Result<(), InvariantViolation> {
    if doc.schema_version != DRAFT_2020_12 && doc.schema_version != DRAFT_07 {
        return Err(InvariantViolation::UnsupportedDialect {
            dialect: doc.schema_version.clone(),
        });
    }

    for (key, section) in &doc.sections {
        for name in &section.required {
            if !section.properties.contains_key(name) {
                return Err(InvariantViolation::RequiredNotDefined {
                    section: key.clone(),
                    name: name.clone(),
                });
            }
        }

        for (name, property) in &section.properties {
            let path = format!("{key}.{name}");
            validate_constraints(&property.constraints, &path)?;
        }
    }

    Ok(())
}

fn validate_constraints(
    constraints: &TypeConstraints,
    path: &str,
) -> Result<(), InvariantViolation> {
    match constraints {
        TypeConstraints::String {
            default,
            allowed,
            pattern,
        } => {
            if let Some(pattern) = pattern {
                let re = Regex::new(pattern).map_err(|e| InvariantViolation::BadPattern {
                    path: path.to_string(),
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                if let Some(default) = default {
                    if !re.is_match(default) {
                        return Err(InvariantViolation::DefaultOutsidePattern {
                            path: path.to_string(),
                            value: default.clone(),
                            pattern: pattern.clone(),
                        });
                    }
                }
                if let Some(allowed) = allowed {
                    for entry in allowed {
                        if !re.is_match(entry) {
                            return Err(InvariantViolation::EnumOutsidePattern {
                                path: path.to_string(),
                                value: entry.clone(),
                                pattern: pattern.clone(),
                            });
                        }
                    }
                }
            }
            Ok(())
        }
        TypeConstraints::Number {
            minimum,
            maximum,
            multiple_of,
            ..
        } => validate_range(path, *minimum, *maximum, *multiple_of),
        TypeConstraints::Integer {
            minimum,
            maximum,
            multiple_of,
            ..
        } => validate_range(
            path,
            minimum.map(|v| v as f64),
            maximum.map(|v| v as f64),
            multiple_of.map(|v| v as f64),
        ),
        TypeConstraints::Boolean { .. } => Ok(()),
    }
}

fn validate_range(
    path: &str,
    minimum: Option<f64>,
    maximum: Option<f64>,
    multiple_of: Option<f64>,
) -> Result<(), InvariantViolation> {
    if let (Some(min), Some(max)) = (minimum, maximum) {
        if min > max {
            return Err(InvariantViolation::InvertedRange {
                path: path.to_string(),
                minimum: min,
                maximum: max,
            });
        }
    }

    if let Some(step) = multiple_of {
        if step <= 0.0 {
            return Err(InvariantViolation::NonPositiveMultiple {
                path: path.to_string(),
                multiple_of: step,
            });
        }
        for (bound, value) in [("minimum", minimum), ("maximum", maximum)] {
            if let Some(value) = value {
                if !divides_exactly(value, step) {
                    return Err(InvariantViolation::NotAMultiple {
                        path: path.to_string(),
                        bound,
                        value,
                        multiple_of: step,
                    });
                }
            }
        }
    }

    Ok(())
}

fn divides_exactly(value: f64, step: f64) -> bool {
    let quotient = value / step;
    (quotient - quotient.round()).abs() < 1e-9
}

/// A resolved position inside the document, stable for patch application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Locator {
    pub section: String,
    pub section_index: usize,
    pub property: Option<PropertySlot>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PropertySlot {
    pub name: String,
    pub index: usize,
    pub property_type: PropertyType,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("No section `{key}` in document")]
    UnknownSection { key: String },

    #[error("No property `{name}` in section `{section}`")]
    UnknownProperty { section: String, name: String },
}

/// Resolve a section key (and optionally a property name) to a locator.
pub fn address_of(
    doc: &SchemaDocument,
    section_key: &str,
    property_name: Option<&str>,
) -> Result<Locator, AddressError> {
    let (section_index, _, section) =
        doc.sections
            .get_full(section_key)
            .ok_or_else(|| AddressError::UnknownSection {
                key: section_key.to_string(),
            })?;

    let property = match property_name {
        None => None,
        Some(name) => {
            let (index, _, property) =
                section
                    .properties
                    .get_full(name)
                    .ok_or_else(|| AddressError::UnknownProperty {
                        section: section_key.to_string(),
                        name: name.to_string(),
                    })?;
            Some(PropertySlot {
                name: name.to_string(),
                index,
                property_type: property.property_type(),
            })
        }
    };

    Ok(Locator {
        section: section_key.to_string(),
        section_index,
        property,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::model::{Property, Section};

    fn doc_with_property(constraints: TypeConstraints) -> SchemaDocument {
        let mut property = Property::new(constraints.property_type());
        property.constraints = constraints;

        let mut section = Section::new("General");
        section.properties.insert("value".to_string(), property);

        let mut doc = SchemaDocument::new();
        doc.sections.insert("general".to_string(), section);
        doc
    }

    #[test]
    fn test_empty_document_is_valid() {
        assert_eq!(validate(&SchemaDocument::new()), Ok(()));
    }

    #[test]
    fn test_unknown_dialect_rejected() {
        let mut doc = SchemaDocument::new();
        doc.schema_version = "https://example.com/not-a-dialect".to_string();
        assert!(matches!(
            validate(&doc),
            Err(InvariantViolation::UnsupportedDialect { .. })
        ));
    }

    #[test]
    fn test_required_must_name_a_property() {
        let mut doc = doc_with_property(TypeConstraints::empty(PropertyType::String));
        doc.sections[0].required.push("missing".to_string());

        assert_eq!(
            validate(&doc),
            Err(InvariantViolation::RequiredNotDefined {
                section: "general".to_string(),
                name: "missing".to_string(),
            })
        );
    }

    #[test]
    fn test_minimum_not_multiple_of_rejected() {
        // minimum 2 with multipleOf 4: 2 is not a multiple of 4
        let doc = doc_with_property(TypeConstraints::Number {
            default: None,
            allowed: None,
            minimum: Some(2.0),
            maximum: None,
            multiple_of: Some(4.0),
        });

        assert_eq!(
            validate(&doc),
            Err(InvariantViolation::NotAMultiple {
                path: "general.value".to_string(),
                bound: "minimum",
                value: 2.0,
                multiple_of: 4.0,
            })
        );
    }

    #[test]
    fn test_exact_multiples_accepted() {
        let doc = doc_with_property(TypeConstraints::Number {
            default: None,
            allowed: None,
            minimum: Some(0.5),
            maximum: Some(2.5),
            multiple_of: Some(0.5),
        });
        assert_eq!(validate(&doc), Ok(()));
    }

    #[test]
    fn test_inverted_range_rejected() {
        let doc = doc_with_property(TypeConstraints::Integer {
            default: None,
            allowed: None,
            minimum: Some(10),
            maximum: Some(5),
            multiple_of: None,
        });
        assert!(matches!(
            validate(&doc),
            Err(InvariantViolation::InvertedRange { .. })
        ));
    }

    #[test]
    fn test_default_must_match_pattern() {
        let doc = doc_with_property(TypeConstraints::String {
            default: Some("no spaces allowed".to_string()),
            allowed: None,
            pattern: Some(r"^\S+$".to_string()),
        });
        assert!(matches!(
            validate(&doc),
            Err(InvariantViolation::DefaultOutsidePattern { .. })
        ));
    }

    #[test]
    fn test_enum_entries_must_match_pattern() {
        let doc = doc_with_property(TypeConstraints::String {
            default: None,
            allowed: Some(vec!["ok".to_string(), "not ok".to_string()]),
            pattern: Some(r"^\S+$".to_string()),
        });
        assert!(matches!(
            validate(&doc),
            Err(InvariantViolation::EnumOutsidePattern { .. })
        ));
    }

    #[test]
    fn test_malformed_pattern_rejected() {
        let doc = doc_with_property(TypeConstraints::String {
            default: None,
            allowed: None,
            pattern: Some("(unclosed".to_string()),
        });
        assert!(matches!(
            validate(&doc),
            Err(InvariantViolation::BadPattern { .. })
        ));
    }

    #[test]
    fn test_address_of_resolves_positions() {
        let mut doc = doc_with_property(TypeConstraints::empty(PropertyType::Boolean));
        doc.sections
            .insert("advanced".to_string(), Section::new("Advanced"));

        let locator = address_of(&doc, "general", Some("value")).unwrap();
        assert_eq!(locator.section_index, 0);
        let slot = locator.property.unwrap();
        assert_eq!(slot.index, 0);
        assert_eq!(slot.property_type, PropertyType::Boolean);

        let locator = address_of(&doc, "advanced", None).unwrap();
        assert_eq!(locator.section_index, 1);
        assert!(locator.property.is_none());
    }

    #[test]
    fn test_address_of_unknown_keys() {
        let doc = doc_with_property(TypeConstraints::empty(PropertyType::String));
        assert_eq!(
            address_of(&doc, "nope", None),
            Err(AddressError::UnknownSection {
                key: "nope".to_string()
            })
        );
        assert_eq!(
            address_of(&doc, "general", Some("nope")),
            Err(AddressError::UnknownProperty {
                section: "general".to_string(),
                name: "nope".to_string()
            })
        );
    }
}
