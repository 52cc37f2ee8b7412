// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{AuthorId, ClientId, DocumentId};

/// Position of a revision in a document's history.
///
/// The first accepted revision of a document has version `1`, `0` means "no revisions yet".
pub type Version = u64;

/// Microseconds since UNIX epoch.
pub type Timestamp = u64;

/// Returns the current system time as a [`Timestamp`].
pub fn current_timestamp() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_micros() as Timestamp)
        .unwrap_or_default()
}

/// One accepted update of a document.
///
/// Revisions are immutable once written. For a fixed document their versions form a gapless,
/// strictly increasing sequence starting at `1`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub document_id: DocumentId,
    pub version: Version,
    pub author_id: AuthorId,
    pub client_id: ClientId,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub created_at: Timestamp,
}

impl Revision {
    pub fn new(
        document_id: DocumentId,
        version: Version,
        author_id: AuthorId,
        client_id: ClientId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            document_id,
            version,
            author_id,
            client_id,
            payload,
            created_at: current_timestamp(),
        }
    }
}

/// Ephemeral cursor or presence state of a client.
///
/// Awareness signals are relayed to other subscribers but never advance the document version
/// and are never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwarenessSignal {
    pub document_id: DocumentId,
    pub client_id: ClientId,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

/// Canonical materialization of a document.
///
/// `content` is the fold of all revisions up to and including `committed_through`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedDocument {
    #[serde(with = "serde_bytes")]
    pub content: Vec<u8>,
    pub committed_through: Version,
    pub committed_at: Timestamp,
}

impl CommittedDocument {
    pub fn new(content: Vec<u8>, committed_through: Version) -> Self {
        Self {
            content,
            committed_through,
            committed_at: current_timestamp(),
        }
    }
}
