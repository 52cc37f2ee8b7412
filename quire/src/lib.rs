// SPDX-License-Identifier: MIT OR Apache-2.0

//! Host collaboratively edited documents.
//!
//! Clients edit a document concurrently by submitting opaque CRDT updates. The [`DocumentHost`]
//! turns every accepted update into an immutable revision with a gapless, strictly increasing
//! version per document, stores it durably and only then broadcasts it to every subscriber of
//! the document, including the submitting client.
//!
//! Awareness signals (cursors, presence) are relayed to subscribers but never stored and never
//! advance the version.
//!
//! Periodically the revision log gets folded into a committed document with the help of a
//! [`Merge`] implementation provided by the application. Commits are debounced while edits are
//! arriving, can be triggered manually and never block incoming updates.
//!
//! Documents are held in memory as sessions while they're used and evicted when idle, see
//! [`Config`] for all parameters.
//!
//! ## Example
//!
//! ```rust
//! # use quire::{DocumentHost, SnapshotMerge, Update};
//! # use quire_core::{AuthorId, ClientId, DocumentId};
//! # use quire_store::MemoryStore;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let host = DocumentHost::builder(MemoryStore::default(), SnapshotMerge).spawn();
//!
//! let document_id = DocumentId::new("notes").unwrap();
//! let update = Update::new(
//!     document_id.clone(),
//!     ClientId::new("tab-1").unwrap(),
//!     AuthorId::new("ada").unwrap(),
//!     0,
//! )
//! .with_payload(b"hello".to_vec());
//!
//! assert_eq!(host.submit_update(update).await.unwrap(), 1);
//! assert_eq!(host.commit_now(&document_id).await.unwrap(), 1);
//! # }
//! ```
mod broadcast;
mod config;
mod coordinator;
mod host;
mod merge;
mod registry;
mod scheduler;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

use quire_store::{DocumentStore, RevisionStore, Transaction};

pub use broadcast::{DocumentEvent, Subscription};
pub use config::{Config, DEFAULT_BROADCAST_CAPACITY, DEFAULT_MAX_PAYLOAD_SIZE};
pub use coordinator::{SubmitError, Update, UpdateCoordinator};
pub use host::{Builder, DocumentHost};
pub use merge::{Merge, SnapshotMerge};
pub use registry::{DocumentSession, RegistryError, SessionRegistry};
pub use scheduler::{CommitError, CommitScheduler};
pub use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

/// Storage backend of a document host.
///
/// Automatically implemented for every store offering revision logs, committed documents and
/// transactions.
pub trait Store:
    RevisionStore + DocumentStore + Transaction + Clone + Send + Sync + 'static
{
}

impl<T> Store for T where
    T: RevisionStore + DocumentStore + Transaction + Clone + Send + Sync + 'static
{
}
