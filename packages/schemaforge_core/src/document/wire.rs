//! Wire form of the schema document
//!
//! Documents travel (and persist) as JSON Schema: sections live under
//! `$defs` (or `definitions` for draft-07 files) and are stitched into
//! the root via an ordered `allOf` reference list. Fields the model does
//! not describe round-trip untouched through per-level passthrough maps.

use serde_json::{json, Map, Number, Value};

use super::model::{DefsKey, Property, PropertyType, SchemaDocument, Section, TypeConstraints};
use super::storage::DocumentError;

/// Serialize a document to its wire JSON object.
pub fn to_wire(doc: &SchemaDocument) -> Value {
    let mut root = Map::new();
    root.insert("$schema".to_string(), Value::from(doc.schema_version.clone()));
    if let Some(title) = &doc.title {
        root.insert("title".to_string(), Value::from(title.clone()));
    }
    if let Some(description) = &doc.description {
        root.insert("description".to_string(), Value::from(description.clone()));
    }
    root.insert("type".to_string(), Value::from("object"));

    let mut defs = Map::new();
    for (key, section) in &doc.sections {
        defs.insert(key.clone(), section_to_wire(section));
    }
    root.insert(doc.defs_key.as_str().to_string(), Value::Object(defs));

    let all_of: Vec<Value> = doc
        .sections
        .keys()
        .map(|key| json!({ "$ref": format!("#/{}/{}", doc.defs_key.as_str(), key) }))
        .collect();
    root.insert("allOf".to_string(), Value::Array(all_of));

    for (key, value) in &doc.passthrough {
        root.insert(key.clone(), value.clone());
    }

    Value::Object(root)
}

fn section_to_wire(section: &Section) -> Value {
    let mut obj = Map::new();
    obj.insert("title".to_string(), Value::from(section.title.clone()));
    if let Some(description) = &section.description {
        obj.insert("description".to_string(), Value::from(description.clone()));
    }
    if let Some(icon) = &section.icon {
        obj.insert("fa_icon".to_string(), Value::from(icon.clone()));
    }
    obj.insert("type".to_string(), Value::from("object"));

    let mut properties = Map::new();
    for (name, property) in &section.properties {
        properties.insert(name.clone(), property_to_wire(property));
    }
    obj.insert("properties".to_string(), Value::Object(properties));

    if !section.required.is_empty() {
        let required: Vec<Value> = section
            .required
            .iter()
            .map(|name| Value::from(name.clone()))
            .collect();
        obj.insert("required".to_string(), Value::Array(required));
    }

    for (key, value) in &section.passthrough {
        obj.insert(key.clone(), value.clone());
    }

    Value::Object(obj)
}

fn property_to_wire(property: &Property) -> Value {
    let mut obj = Map::new();
    obj.insert(
        "type".to_string(),
        Value::from(property.property_type().as_str()),
    );
    if let Some(title) = &property.title {
        obj.insert("title".to_string(), Value::from(title.clone()));
    }
    if let Some(description) = &property.description {
        obj.insert("description".to_string(), Value::from(description.clone()));
    }
    if let Some(help_text) = &property.help_text {
        obj.insert("help_text".to_string(), Value::from(help_text.clone()));
    }
    if let Some(icon) = &property.icon {
        obj.insert("fa_icon".to_string(), Value::from(icon.clone()));
    }
    if let Some(format) = &property.format {
        obj.insert("format".to_string(), Value::from(format.clone()));
    }
    if property.hidden {
        obj.insert("hidden".to_string(), Value::Bool(true));
    }

    match &property.constraints {
        TypeConstraints::String {
            default,
            allowed,
            pattern,
        } => {
            if let Some(default) = default {
                obj.insert("default".to_string(), Value::from(default.clone()));
            }
            if let Some(allowed) = allowed {
                let entries = allowed.iter().map(|v| Value::from(v.clone())).collect();
                obj.insert("enum".to_string(), Value::Array(entries));
            }
            if let Some(pattern) = pattern {
                obj.insert("pattern".to_string(), Value::from(pattern.clone()));
            }
        }
        TypeConstraints::Number {
            default,
            allowed,
            minimum,
            maximum,
            multiple_of,
        } => {
            if let Some(default) = default {
                obj.insert("default".to_string(), number_value(*default));
            }
            if let Some(allowed) = allowed {
                let entries = allowed.iter().map(|v| number_value(*v)).collect();
                obj.insert("enum".to_string(), Value::Array(entries));
            }
            if let Some(minimum) = minimum {
                obj.insert("minimum".to_string(), number_value(*minimum));
            }
            if let Some(maximum) = maximum {
                obj.insert("maximum".to_string(), number_value(*maximum));
            }
            if let Some(multiple_of) = multiple_of {
                obj.insert("multipleOf".to_string(), number_value(*multiple_of));
            }
        }
        TypeConstraints::Integer {
            default,
            allowed,
            minimum,
            maximum,
            multiple_of,
        } => {
            if let Some(default) = default {
                obj.insert("default".to_string(), Value::from(*default));
            }
            if let Some(allowed) = allowed {
                let entries = allowed.iter().map(|v| Value::from(*v)).collect();
                obj.insert("enum".to_string(), Value::Array(entries));
            }
            if let Some(minimum) = minimum {
                obj.insert("minimum".to_string(), Value::from(*minimum));
            }
            if let Some(maximum) = maximum {
                obj.insert("maximum".to_string(), Value::from(*maximum));
            }
            if let Some(multiple_of) = multiple_of {
                obj.insert("multipleOf".to_string(), Value::from(*multiple_of));
            }
        }
        TypeConstraints::Boolean { default } => {
            if let Some(default) = default {
                obj.insert("default".to_string(), Value::Bool(*default));
            }
        }
    }

    for (key, value) in &property.passthrough {
        obj.insert(key.clone(), value.clone());
    }

    Value::Object(obj)
}

fn number_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Parse a wire JSON object back into a document.
///
/// Parsing is strict about fields the model does describe: a `pattern`
/// on a numeric property or a `minimum` on a string property is rejected
/// rather than silently carried along.
pub fn from_wire(value: &Value) -> Result<SchemaDocument, DocumentError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DocumentError::Parse("schema must be a JSON object".to_string()))?;

    let mut doc = SchemaDocument::new();
    doc.schema_version = String::new();
    let mut defs: Option<&Map<String, Value>> = None;
    let mut ref_order: Vec<String> = Vec::new();

    for (key, value) in obj {
        match key.as_str() {
            "$schema" => doc.schema_version = expect_str(value, "$schema")?,
            "title" => doc.title = Some(expect_str(value, "title")?),
            "description" => doc.description = Some(expect_str(value, "description")?),
            "type" => {}
            "$defs" => {
                doc.defs_key = DefsKey::Defs;
                defs = Some(expect_obj(value, "$defs")?);
            }
            "definitions" => {
                doc.defs_key = DefsKey::Definitions;
                defs = Some(expect_obj(value, "definitions")?);
            }
            "allOf" => ref_order = parse_all_of(value)?,
            _ => {
                doc.passthrough.insert(key.clone(), value.clone());
            }
        }
    }

    if doc.schema_version.is_empty() {
        return Err(DocumentError::Parse("schema is missing `$schema`".to_string()));
    }

    if let Some(defs) = defs {
        for key in &ref_order {
            let section = defs.get(key).ok_or_else(|| {
                DocumentError::Parse(format!("allOf references unknown definition `{key}`"))
            })?;
            doc.sections
                .insert(key.clone(), section_from_wire(key, section)?);
        }
        for (key, section) in defs {
            if !doc.sections.contains_key(key) {
                doc.sections
                    .insert(key.clone(), section_from_wire(key, section)?);
            }
        }
    }

    Ok(doc)
}

fn parse_all_of(value: &Value) -> Result<Vec<String>, DocumentError> {
    let entries = value
        .as_array()
        .ok_or_else(|| DocumentError::Parse("`allOf` must be an array".to_string()))?;

    let mut order = Vec::with_capacity(entries.len());
    for entry in entries {
        let reference = entry
            .as_object()
            .and_then(|o| o.get("$ref"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                DocumentError::Parse("`allOf` entries must be `$ref` objects".to_string())
            })?;
        let key = reference.rsplit('/').next().unwrap_or(reference);
        order.push(key.to_string());
    }
    Ok(order)
}

fn section_from_wire(key: &str, value: &Value) -> Result<Section, DocumentError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DocumentError::Parse(format!("definition `{key}` must be an object")))?;

    let mut section = Section::new("");
    for (field, value) in obj {
        match field.as_str() {
            "title" => section.title = expect_str(value, "title")?,
            "description" => section.description = Some(expect_str(value, "description")?),
            "fa_icon" => section.icon = Some(expect_str(value, "fa_icon")?),
            "type" => {}
            "properties" => {
                let properties = expect_obj(value, "properties")?;
                for (name, property) in properties {
                    let path = format!("{key}.{name}");
                    section
                        .properties
                        .insert(name.clone(), property_from_wire(&path, property)?);
                }
            }
            "required" => {
                let entries = value.as_array().ok_or_else(|| {
                    DocumentError::Parse(format!("`required` in `{key}` must be an array"))
                })?;
                for entry in entries {
                    section
                        .required
                        .push(expect_str(entry, "required entry")?);
                }
            }
            _ => {
                section.passthrough.insert(field.clone(), value.clone());
            }
        }
    }

    Ok(section)
}

fn property_from_wire(path: &str, value: &Value) -> Result<Property, DocumentError> {
    let obj = value
        .as_object()
        .ok_or_else(|| DocumentError::Parse(format!("property `{path}` must be an object")))?;

    let type_name = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| DocumentError::Parse(format!("property `{path}` is missing `type`")))?;
    let property_type = PropertyType::from_str(type_name).ok_or_else(|| {
        DocumentError::Parse(format!("unsupported type `{type_name}` at `{path}`"))
    })?;

    let mut property = Property::new(property_type);
    let mut default: Option<&Value> = None;
    let mut allowed: Option<&Vec<Value>> = None;
    let mut pattern: Option<String> = None;
    let mut minimum: Option<&Value> = None;
    let mut maximum: Option<&Value> = None;
    let mut multiple_of: Option<&Value> = None;

    for (field, value) in obj {
        match field.as_str() {
            "type" => {}
            "title" => property.title = Some(expect_str(value, "title")?),
            "description" => property.description = Some(expect_str(value, "description")?),
            "help_text" => property.help_text = Some(expect_str(value, "help_text")?),
            "fa_icon" => property.icon = Some(expect_str(value, "fa_icon")?),
            "format" => property.format = Some(expect_str(value, "format")?),
            "hidden" => {
                property.hidden = value.as_bool().ok_or_else(|| {
                    DocumentError::Parse(format!("`hidden` at `{path}` must be a boolean"))
                })?
            }
            "default" => default = Some(value),
            "enum" => {
                allowed = Some(value.as_array().ok_or_else(|| {
                    DocumentError::Parse(format!("`enum` at `{path}` must be an array"))
                })?)
            }
            "pattern" => pattern = Some(expect_str(value, "pattern")?),
            "minimum" => minimum = Some(value),
            "maximum" => maximum = Some(value),
            "multipleOf" => multiple_of = Some(value),
            _ => {
                property.passthrough.insert(field.clone(), value.clone());
            }
        }
    }

    if property_type != PropertyType::String && pattern.is_some() {
        return Err(DocumentError::Parse(format!(
            "`pattern` is only valid on string properties at `{path}`"
        )));
    }
    if !property_type.is_numeric() && (minimum.is_some() || maximum.is_some() || multiple_of.is_some())
    {
        return Err(DocumentError::Parse(format!(
            "numeric constraints are only valid on number/integer properties at `{path}`"
        )));
    }

    property.constraints = match property_type {
        PropertyType::String => TypeConstraints::String {
            default: default.map(|v| expect_str(v, "default")).transpose()?,
            allowed: allowed
                .map(|entries| {
                    entries
                        .iter()
                        .map(|v| expect_str(v, "enum entry"))
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?,
            pattern,
        },
        PropertyType::Number => TypeConstraints::Number {
            default: default.map(|v| expect_f64(v, path)).transpose()?,
            allowed: allowed
                .map(|entries| {
                    entries
                        .iter()
                        .map(|v| expect_f64(v, path))
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?,
            minimum: minimum.map(|v| expect_f64(v, path)).transpose()?,
            maximum: maximum.map(|v| expect_f64(v, path)).transpose()?,
            multiple_of: multiple_of.map(|v| expect_f64(v, path)).transpose()?,
        },
        PropertyType::Integer => TypeConstraints::Integer {
            default: default.map(|v| expect_i64(v, path)).transpose()?,
            allowed: allowed
                .map(|entries| {
                    entries
                        .iter()
                        .map(|v| expect_i64(v, path))
                        .collect::<Result<Vec<_>, _>>()
                })
                .transpose()?,
            minimum: minimum.map(|v| expect_i64(v, path)).transpose()?,
            maximum: maximum.map(|v| expect_i64(v, path)).transpose()?,
            multiple_of: multiple_of.map(|v| expect_i64(v, path)).transpose()?,
        },
        PropertyType::Boolean => TypeConstraints::Boolean {
            default: default
                .map(|v| {
                    v.as_bool().ok_or_else(|| {
                        DocumentError::Parse(format!("`default` at `{path}` must be a boolean"))
                    })
                })
                .transpose()?,
        },
    };

    Ok(property)
}

fn expect_str(value: &Value, field: &str) -> Result<String, DocumentError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DocumentError::Parse(format!("`{field}` must be a string")))
}

fn expect_obj<'a>(value: &'a Value, field: &str) -> Result<&'a Map<String, Value>, DocumentError> {
    value
        .as_object()
        .ok_or_else(|| DocumentError::Parse(format!("`{field}` must be an object")))
}

fn expect_f64(value: &Value, path: &str) -> Result<f64, DocumentError> {
    value
        .as_f64()
        .ok_or_else(|| DocumentError::Parse(format!("expected a number at `{path}`")))
}

fn expect_i64(value: &Value, path: &str) -> Result<i64, DocumentError> {
    value
        .as_i64()
        .ok_or_else(|| DocumentError::Parse(format!("expected an integer at `{path}`")))
}
