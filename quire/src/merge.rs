// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interface to the CRDT implementation folding revisions into documents.
use std::convert::Infallible;
use std::error::Error;

use quire_core::Revision;

/// Black-box merge operation of a CRDT implementation.
///
/// Implementations need to be deterministic: folding the same base content with the same ordered
/// revisions always yields the same content. Retrying a failed commit relies on this.
///
/// Merges run on a blocking thread and can take as long as they need, within the configured
/// commit timeout.
pub trait Merge: Send + Sync + 'static {
    type Error: Error + Send + Sync + 'static;

    /// Structural validation of an incoming update before it gets a version assigned.
    ///
    /// Rejected updates are reported to the submitting client as malformed and leave the
    /// document untouched.
    fn validate_update(&self, _payload: &[u8]) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Fold revisions, ordered by ascending version, into the base content.
    fn merge(&self, base: &[u8], revisions: &[Revision]) -> Result<Vec<u8>, Self::Error>;
}

/// Merge for payloads which are full content snapshots.
///
/// The latest snapshot always wins, the base is kept when there is nothing to fold.
#[derive(Clone, Copy, Debug, Default)]
pub struct SnapshotMerge;

impl Merge for SnapshotMerge {
    type Error = Infallible;

    fn merge(&self, base: &[u8], revisions: &[Revision]) -> Result<Vec<u8>, Self::Error> {
        let content = revisions
            .iter()
            .max_by_key(|revision| revision.version)
            .map(|revision| revision.payload.clone())
            .unwrap_or_else(|| base.to_vec());
        Ok(content)
    }
}
