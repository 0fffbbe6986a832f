use super::store::{ResultBackend, StoreDocument};
use crate::errors::StoreResult;
use std::collections::BTreeSet;

/// Volatile backend for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    doc: StoreDocument,
    writes: usize,
}

impl MemoryBackend {
    pub fn with_document(doc: StoreDocument) -> Self {
        Self { doc, writes: 0 }
    }

    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl ResultBackend for MemoryBackend {
    fn load(&self) -> StoreResult<StoreDocument> {
        Ok(self.doc.clone())
    }

    fn persist(&mut self, doc: &StoreDocument, _changed: &BTreeSet<String>) -> StoreResult<()> {
        self.doc = doc.clone();
        self.writes += 1;
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
