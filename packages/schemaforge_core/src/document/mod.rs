//! The canonical schema document model
//!
//! A `SchemaDocument` is an ordered collection of sections, each holding
//! an ordered collection of typed properties. Section keys and property
//! names are the stable identities used for addressing and renames;
//! display titles can change independently.

mod model;
mod storage;
mod validate;
mod wire;

pub use model::{
    DefsKey, Property, PropertyType, SchemaDocument, Section, TypeConstraints, DRAFT_07,
    DRAFT_2020_12,
};
pub use storage::{load_document, write_document, DocumentError};
pub use validate::{address_of, validate, AddressError, InvariantViolation, Locator, PropertySlot};
pub use wire::{from_wire, to_wire};
