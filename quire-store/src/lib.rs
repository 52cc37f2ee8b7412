// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence for revision logs and committed documents.
//!
//! Two interfaces are offered:
//!
//! - [`RevisionStore`]: durable, append-only log of revisions per document. Appends are
//!   rejected (returning `false`) when a revision with the same document id and version already
//!   exists, which makes the store the last line of defense against allocating a version twice.
//! - [`DocumentStore`]: canonical materialization of a document, written when the revision log
//!   was folded by a commit.
//!
//! Writes happen inside a [`Transaction`], reads don't need one. Multiple writes which need to
//! strictly _all_ occur or _none_ occur (for example saving a committed document and pruning the
//! folded revisions) are grouped into one transaction.
//!
//! ## Store implementations
//!
//! An in-memory store is provided with [`MemoryStore`], gated by the `memory` feature. It is
//! intended for development and tests and loses all data when the process ends.
//!
//! A SQLite store is provided with [`SqliteStore`], gated by the `sqlite` feature. Both are
//! enabled by default.
pub mod documents;
#[cfg(feature = "memory")]
pub mod memory;
pub mod revisions;
#[cfg(feature = "sqlite")]
pub mod sqlite;
#[cfg(any(test, feature = "test_utils"))]
mod test_utils;
mod traits;

pub use documents::DocumentStore;
#[cfg(feature = "memory")]
pub use memory::MemoryStore;
pub use revisions::RevisionStore;
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteError, SqliteStore, SqliteStoreBuilder};
pub use traits::Transaction;
