// Schemaforge - Pipeline Parameter Schema Editing Core

pub mod document;
pub mod draft;
pub mod reconcile;
pub mod server;
pub mod session;
pub mod sync;
