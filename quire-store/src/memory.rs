// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::documents::DocumentMemoryStore;
use crate::revisions::RevisionMemoryStore;

/// In-memory store.
///
/// This does not persist data permamently, all changes are lost when the process ends. Use this
/// only in development or test contexts.
///
/// Transactions are accepted but have no effect: every write is applied immediately and can not
/// be rolled back.
#[derive(Clone, Debug)]
pub struct MemoryStore {
    pub revisions: RevisionMemoryStore,
    pub documents: DocumentMemoryStore,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            revisions: RevisionMemoryStore::new(),
            documents: DocumentMemoryStore::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl crate::traits::Transaction for MemoryStore {
    type Error = std::convert::Infallible;

    type Permit = ();

    async fn begin(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn rollback(&self, _permit: ()) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn commit(&self, _permit: ()) -> Result<(), Self::Error> {
        Ok(())
    }
}

// Store trait implementations are in the regarding modules, see `revisions` and `documents`.
