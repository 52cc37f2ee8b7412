// SPDX-License-Identifier: MIT OR Apache-2.0

//! Data-types shared by every layer hosting a collaboratively edited document.
//!
//! A document is edited by many clients at once. Each accepted edit becomes an immutable
//! [`Revision`] carrying an opaque payload (usually a CRDT update) and a [`Version`] which is
//! unique, gapless and strictly increasing per [`DocumentId`]. Ephemeral presence information
//! travels as an [`AwarenessSignal`] and is never versioned or stored.
//!
//! Periodically the revision log is folded into a [`CommittedDocument`], the canonical
//! materialization of the document up to some version.
//!
//! The payload bytes are never interpreted by this crate or the layers above it, merging them is
//! the job of an external CRDT implementation.
pub mod cbor;
mod identity;
mod revision;

pub use identity::{AuthorId, ClientId, DocumentId, IdentityError};
pub use revision::{
    AwarenessSignal, CommittedDocument, Revision, Timestamp, Version, current_timestamp,
};
