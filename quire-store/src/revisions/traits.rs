// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use quire_core::{DocumentId, Revision, Version};

/// Interface for appending, querying and pruning the revision log of documents.
///
/// The store does not allocate versions and does not validate that they are gapless, this is the
/// job of the single writer per document. It does however guarantee that a version is never
/// stored twice for the same document.
///
/// Writes are expected to happen inside a [`Transaction`](crate::Transaction).
pub trait RevisionStore {
    type Error: Error + Send + Sync + 'static;

    /// Append a revision to the log of its document.
    ///
    /// Returns `true` when the insert occurred, or `false` when a revision with the same document
    /// id and version already existed and no insertion occurred.
    fn append_revision(
        &self,
        revision: &Revision,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;

    /// Get revisions of a document in ascending version order.
    ///
    /// The range includes both bounds, `from` and `to`. If `to` is not given all revisions
    /// starting with `from` are returned.
    fn get_revisions(
        &self,
        document_id: &DocumentId,
        from: Version,
        to: Option<Version>,
    ) -> impl Future<Output = Result<Vec<Revision>, Self::Error>> + Send;

    /// Highest stored version of a document, `0` if no revisions exist.
    fn latest_version(
        &self,
        document_id: &DocumentId,
    ) -> impl Future<Output = Result<Version, Self::Error>> + Send;

    /// Delete all revisions of a document up to and including the given version.
    ///
    /// Returns the number of deleted revisions.
    fn prune_revisions(
        &self,
        document_id: &DocumentId,
        through: Version,
    ) -> impl Future<Output = Result<u64, Self::Error>> + Send;
}
