//! Loading and writing schema documents on disk
//!
//! Schema files are JSON by default; `.yml`/`.yaml` files are accepted
//! on load. Writes always produce 2-space-indented JSON, matching what
//! the backing store persists.

use std::path::Path;

use thiserror::Error;

use super::model::SchemaDocument;
use super::validate::InvariantViolation;
use super::wire::{from_wire, to_wire};

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid schema file: {0}")]
    Parse(String),

    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
}

/// Load a schema document from a JSON or YAML file.
pub fn load_document(path: &Path) -> Result<SchemaDocument, DocumentError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| DocumentError::Io(format!("{}: {e}", path.display())))?;

    let is_yaml = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yml") | Some("yaml")
    );

    let value: serde_json::Value = if is_yaml {
        serde_yaml::from_str(&text).map_err(|e| DocumentError::Parse(e.to_string()))?
    } else {
        serde_json::from_str(&text).map_err(|e| DocumentError::Parse(e.to_string()))?
    };

    from_wire(&value)
}

/// Write a schema document as 2-space-indented JSON.
pub fn write_document(path: &Path, doc: &SchemaDocument) -> Result<(), DocumentError> {
    let json = serde_json::to_string_pretty(&to_wire(doc))
        .map_err(|e| DocumentError::Parse(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| DocumentError::Io(format!("{}: {e}", path.display())))
}
