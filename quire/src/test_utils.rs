// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers for testing applications hosting documents.
use std::convert::Infallible;
use std::str::Utf8Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use quire_core::{CommittedDocument, DocumentId, Revision, Version};
use quire_store::{DocumentStore, MemoryStore, RevisionStore, Transaction};
use thiserror::Error;

use crate::merge::Merge;

pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Merge treating payloads as UTF-8 text appended to the document.
///
/// Updates which are not valid UTF-8 are rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConcatMerge;

impl Merge for ConcatMerge {
    type Error = Utf8Error;

    fn validate_update(&self, payload: &[u8]) -> Result<(), Self::Error> {
        std::str::from_utf8(payload)?;
        Ok(())
    }

    fn merge(&self, base: &[u8], revisions: &[Revision]) -> Result<Vec<u8>, Self::Error> {
        let mut content = base.to_vec();
        for revision in revisions {
            content.extend_from_slice(&revision.payload);
        }
        Ok(content)
    }
}

#[derive(Debug, Error)]
pub enum FaultError {
    #[error("injected append failure")]
    Append,

    #[error("injected save failure")]
    Save,
}

impl From<Infallible> for FaultError {
    fn from(err: Infallible) -> Self {
        match err {}
    }
}

#[derive(Debug, Default)]
struct Faults {
    fail_appends: AtomicBool,
    stall_appends: AtomicBool,
    fail_saves: AtomicBool,
}

/// In-memory store with switchable failures.
#[derive(Clone, Debug, Default)]
pub struct FaultyStore {
    pub inner: MemoryStore,
    faults: Arc<Faults>,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appending revisions fails while set.
    pub fn fail_appends(&self, fail: bool) {
        self.faults.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Appending revisions never finishes while set.
    pub fn stall_appends(&self, stall: bool) {
        self.faults.stall_appends.store(stall, Ordering::SeqCst);
    }

    /// Saving committed documents fails while set.
    pub fn fail_saves(&self, fail: bool) {
        self.faults.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl RevisionStore for FaultyStore {
    type Error = FaultError;

    async fn append_revision(&self, revision: &Revision) -> Result<bool, Self::Error> {
        if self.faults.stall_appends.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.faults.fail_appends.load(Ordering::SeqCst) {
            return Err(FaultError::Append);
        }
        Ok(self.inner.append_revision(revision).await?)
    }

    async fn get_revisions(
        &self,
        document_id: &DocumentId,
        from: Version,
        to: Option<Version>,
    ) -> Result<Vec<Revision>, Self::Error> {
        Ok(self.inner.get_revisions(document_id, from, to).await?)
    }

    async fn latest_version(&self, document_id: &DocumentId) -> Result<Version, Self::Error> {
        Ok(self.inner.latest_version(document_id).await?)
    }

    async fn prune_revisions(
        &self,
        document_id: &DocumentId,
        through: Version,
    ) -> Result<u64, Self::Error> {
        Ok(self.inner.prune_revisions(document_id, through).await?)
    }
}

impl DocumentStore for FaultyStore {
    type Error = FaultError;

    async fn load_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<Option<CommittedDocument>, Self::Error> {
        Ok(self.inner.load_document(document_id).await?)
    }

    async fn save_document(
        &self,
        document_id: &DocumentId,
        document: &CommittedDocument,
    ) -> Result<(), Self::Error> {
        if self.faults.fail_saves.load(Ordering::SeqCst) {
            return Err(FaultError::Save);
        }
        Ok(self.inner.save_document(document_id, document).await?)
    }
}

impl Transaction for FaultyStore {
    type Error = Infallible;

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
