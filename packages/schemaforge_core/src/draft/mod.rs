//! Local draft store
//!
//! Holds the client's working copy of the schema document. State is
//! only ever handed out as cloned snapshots; the single mutation path
//! is a validated atomic swap, so rendering code can never corrupt the
//! draft in place.

use tokio::sync::RwLock;

use crate::document::{validate, InvariantViolation, SchemaDocument};

pub struct DraftStore {
    doc: RwLock<SchemaDocument>,
}

impl DraftStore {
    pub fn new(doc: SchemaDocument) -> Self {
        Self {
            doc: RwLock::new(doc),
        }
    }

    /// An empty draft under the default dialect.
    pub fn empty() -> Self {
        Self::new(SchemaDocument::new())
    }

    /// Replace the held document wholesale, without reconciliation.
    /// Used after a successful fetch of the authoritative copy.
    pub async fn load(&self, doc: SchemaDocument) {
        *self.doc.write().await = doc;
    }

    /// Clone of the present state.
    pub async fn current_snapshot(&self) -> SchemaDocument {
        self.doc.read().await.clone()
    }

    /// Atomically swap in a reconciled document, provided it validates.
    /// On violation the prior state is left intact.
    pub async fn apply_reconciled(
        &self,
        new_doc: SchemaDocument,
    ) -> Result<(), InvariantViolation> {
        validate(&new_doc)?;
        *self.doc.write().await = new_doc;
        Ok(())
    }
}
