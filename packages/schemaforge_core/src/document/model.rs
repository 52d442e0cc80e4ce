//! Data types for the schema document

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::fmt;

/// Dialect URI for JSON Schema draft 2020-12.
pub const DRAFT_2020_12: &str = "https://json-schema.org/draft/2020-12/schema";

/// Dialect URI for JSON Schema draft-07.
pub const DRAFT_07: &str = "http://json-schema.org/draft-07/schema";

/// Which wire key holds the section definitions.
///
/// Draft 2020-12 documents use `$defs`; draft-07 documents written by
/// older tooling use `definitions`. Remembered per document so the file
/// round-trips under its original notation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DefsKey {
    #[default]
    Defs,
    Definitions,
}

impl DefsKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefsKey::Defs => "$defs",
            DefsKey::Definitions => "definitions",
        }
    }
}

/// The whole-document state: dialect, display text, and ordered sections.
///
/// `passthrough` keeps top-level wire fields the model does not describe
/// (e.g. `$id`) so serialization is lossless.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaDocument {
    pub schema_version: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub sections: IndexMap<String, Section>,
    pub defs_key: DefsKey,
    pub passthrough: Map<String, Value>,
}

impl SchemaDocument {
    /// An empty document under the default (draft 2020-12) dialect.
    pub fn new() -> Self {
        Self {
            schema_version: DRAFT_2020_12.to_string(),
            title: None,
            description: None,
            sections: IndexMap::new(),
            defs_key: DefsKey::default(),
            passthrough: Map::new(),
        }
    }
}

impl Default for SchemaDocument {
    fn default() -> Self {
        Self::new()
    }
}

/// A named, ordered group of properties.
#[derive(Clone, Debug, PartialEq)]
pub struct Section {
    pub title: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub properties: IndexMap<String, Property>,
    /// Ordered list with set semantics; every entry must name a property.
    pub required: Vec<String>,
    pub passthrough: Map<String, Value>,
}

impl Section {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            icon: None,
            properties: IndexMap::new(),
            required: Vec::new(),
            passthrough: Map::new(),
        }
    }
}

/// The closed set of property types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PropertyType {
    String,
    Number,
    Integer,
    Boolean,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Number => "number",
            PropertyType::Integer => "integer",
            PropertyType::Boolean => "boolean",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "string" => Some(PropertyType::String),
            "number" => Some(PropertyType::Number),
            "integer" => Some(PropertyType::Integer),
            "boolean" => Some(PropertyType::Boolean),
            _ => None,
        }
    }

    /// Number and integer share the numeric constraint class.
    pub fn is_numeric(&self) -> bool {
        matches!(self, PropertyType::Number | PropertyType::Integer)
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-type constraint fields.
///
/// Each variant carries only the fields valid for its type: `pattern`
/// exists on strings, range constraints on numerics. Switching a
/// property's type swaps the variant, so stale constraints cannot
/// survive a type change.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeConstraints {
    String {
        default: Option<String>,
        allowed: Option<Vec<String>>,
        pattern: Option<String>,
    },
    Number {
        default: Option<f64>,
        allowed: Option<Vec<f64>>,
        minimum: Option<f64>,
        maximum: Option<f64>,
        multiple_of: Option<f64>,
    },
    Integer {
        default: Option<i64>,
        allowed: Option<Vec<i64>>,
        minimum: Option<i64>,
        maximum: Option<i64>,
        multiple_of: Option<i64>,
    },
    Boolean {
        default: Option<bool>,
    },
}

impl TypeConstraints {
    /// A constraint set for `property_type` with nothing set.
    pub fn empty(property_type: PropertyType) -> Self {
        match property_type {
            PropertyType::String => TypeConstraints::String {
                default: None,
                allowed: None,
                pattern: None,
            },
            PropertyType::Number => TypeConstraints::Number {
                default: None,
                allowed: None,
                minimum: None,
                maximum: None,
                multiple_of: None,
            },
            PropertyType::Integer => TypeConstraints::Integer {
                default: None,
                allowed: None,
                minimum: None,
                maximum: None,
                multiple_of: None,
            },
            PropertyType::Boolean => TypeConstraints::Boolean { default: None },
        }
    }

    pub fn property_type(&self) -> PropertyType {
        match self {
            TypeConstraints::String { .. } => PropertyType::String,
            TypeConstraints::Number { .. } => PropertyType::Number,
            TypeConstraints::Integer { .. } => PropertyType::Integer,
            TypeConstraints::Boolean { .. } => PropertyType::Boolean,
        }
    }
}

/// A single parameter definition: type constraints plus display metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct Property {
    pub constraints: TypeConstraints,
    pub title: Option<String>,
    pub description: Option<String>,
    pub help_text: Option<String>,
    pub icon: Option<String>,
    pub format: Option<String>,
    pub hidden: bool,
    pub passthrough: Map<String, Value>,
}

impl Property {
    pub fn new(property_type: PropertyType) -> Self {
        Self {
            constraints: TypeConstraints::empty(property_type),
            title: None,
            description: None,
            help_text: None,
            icon: None,
            format: None,
            hidden: false,
            passthrough: Map::new(),
        }
    }

    pub fn property_type(&self) -> PropertyType {
        self.constraints.property_type()
    }
}
