// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, RwLock};

use quire_core::{CommittedDocument, DocumentId};

use crate::documents::DocumentStore;
use crate::memory::MemoryStore;

#[derive(Clone, Debug, Default)]
pub struct DocumentMemoryStore {
    documents: Arc<RwLock<HashMap<DocumentId, CommittedDocument>>>,
}

impl DocumentMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryStore {
    type Error = Infallible;

    async fn load_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<CommittedDocument>, Self::Error> {
        let documents = self
            .documents
            .documents
            .read()
            .expect("acquire shared read access on store");
        Ok(documents.get(document_id).cloned())
    }

    async fn save_document(
        &self,
        document_id: &DocumentId,
        document: &CommittedDocument,
    ) -> Result<(), Self::Error> {
        let mut documents = self
            .documents
            .documents
            .write()
            .expect("acquire exclusive write access on store");
        documents.insert(document_id.clone(), document.clone());
        Ok(())
    }
}
