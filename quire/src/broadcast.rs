// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fan-out of accepted revisions and awareness signals to every subscriber of a document.
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::{Stream, StreamExt};
use quire_core::cbor::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use quire_core::{AuthorId, ClientId, DocumentId, Revision, Version};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::registry::DocumentSession;

/// Event delivered to subscribers of a document.
///
/// Events of one document are delivered to every subscriber in the order versions were assigned.
/// The originating client receives its own events as well and recognises them by the client id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentEvent {
    /// A revision was durably stored under the given version.
    RevisionAccepted {
        version: Version,
        author_id: AuthorId,
        client_id: ClientId,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
        /// Awareness signal which was submitted together with the revision.
        #[serde(with = "serde_bytes", default)]
        awareness: Option<Vec<u8>>,
    },

    /// A client relayed ephemeral presence state. Does not advance the document version.
    AwarenessUpdated {
        client_id: ClientId,
        #[serde(with = "serde_bytes")]
        payload: Vec<u8>,
    },
}

impl DocumentEvent {
    pub(crate) fn accepted(revision: Revision, awareness: Option<Vec<u8>>) -> Self {
        Self::RevisionAccepted {
            version: revision.version,
            author_id: revision.author_id,
            client_id: revision.client_id,
            payload: revision.payload,
            awareness,
        }
    }

    /// Client which caused this event.
    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::RevisionAccepted { client_id, .. } => client_id,
            Self::AwarenessUpdated { client_id, .. } => client_id,
        }
    }

    /// Version of the accepted revision, `None` for awareness signals.
    pub fn version(&self) -> Option<Version> {
        match self {
            Self::RevisionAccepted { version, .. } => Some(*version),
            Self::AwarenessUpdated { .. } => None,
        }
    }

    /// Encode event as CBOR, for example to forward it over a websocket.
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        decode_cbor(bytes)
    }
}

/// Stream of events of one document.
///
/// A subscription keeps the document session alive, it will not be evicted from memory while
/// subscriptions to it exist.
///
/// Subscribers which don't keep up with the configured broadcast capacity receive a
/// [`BroadcastStreamRecvError::Lagged`] error with the number of skipped events. The stream
/// continues with the oldest still buffered event afterwards, the skipped revisions can be read
/// from the revision log.
#[derive(Debug)]
pub struct Subscription {
    document_id: DocumentId,
    events_rx: BroadcastStream<DocumentEvent>,
    _session: Arc<DocumentSession>,
}

impl Subscription {
    pub(crate) fn new(session: Arc<DocumentSession>) -> Self {
        Self {
            document_id: session.document_id().clone(),
            events_rx: BroadcastStream::new(session.events_rx()),
            _session: session,
        }
    }

    /// Returns the document this subscription receives events from.
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }
}

impl Stream for Subscription {
    type Item = Result<DocumentEvent, BroadcastStreamRecvError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events_rx.poll_next_unpin(cx)
    }
}

#[cfg(test)]
mod tests {
    use quire_core::{AuthorId, ClientId, DocumentId, Revision};

    use super::DocumentEvent;

    #[test]
    fn encode_events() {
        let revision = Revision::new(
            DocumentId::new("doc").unwrap(),
            3,
            AuthorId::new("ada").unwrap(),
            ClientId::new("tab-1").unwrap(),
            vec![1, 2, 3],
        );

        let event = DocumentEvent::accepted(revision, Some(vec![9]));
        assert_eq!(event.version(), Some(3));
        assert_eq!(event.client_id().as_str(), "tab-1");
        let bytes = event.to_bytes().unwrap();
        assert_eq!(DocumentEvent::from_bytes(&bytes).unwrap(), event);

        let event = DocumentEvent::AwarenessUpdated {
            client_id: ClientId::new("tab-2").unwrap(),
            payload: b"cursor".to_vec(),
        };
        assert_eq!(event.version(), None);
        let bytes = event.to_bytes().unwrap();
        assert_eq!(DocumentEvent::from_bytes(&bytes).unwrap(), event);
    }
}
