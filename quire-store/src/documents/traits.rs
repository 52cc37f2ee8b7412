// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use quire_core::{CommittedDocument, DocumentId};

/// Interface for loading and saving the canonical, committed state of documents.
pub trait DocumentStore {
    type Error: Error + Send + Sync + 'static;

    /// Get the last committed state of a document.
    ///
    /// Returns `None` if the document was never committed.
    fn load_document(
        &self,
        document_id: &DocumentId,
    ) -> impl Future<Output = Result<Option<CommittedDocument>, Self::Error>> + Send;

    /// Insert or replace the committed state of a document.
    fn save_document(
        &self,
        document_id: &DocumentId,
        document: &CommittedDocument,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
