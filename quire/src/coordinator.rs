// SPDX-License-Identifier: MIT OR Apache-2.0

//! Assigning versions to incoming updates, storing and broadcasting them.
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use quire_core::{AuthorId, ClientId, DocumentId, Revision, Version};
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::Store;
use crate::broadcast::DocumentEvent;
use crate::merge::Merge;
use crate::registry::{DocumentSession, RegistryError, SessionRegistry, VersionGuard};
use crate::scheduler::CommitScheduler;

/// Update submitted by a client.
///
/// An update carries a CRDT payload, an awareness signal or both. Payloads are stored as a new
/// revision, awareness signals are only relayed to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub document_id: DocumentId,
    pub client_id: ClientId,
    pub author_id: AuthorId,

    /// Latest version the client has seen.
    pub base_version: Version,

    pub payload: Option<Vec<u8>>,
    pub awareness: Option<Vec<u8>>,
}

impl Update {
    pub fn new(
        document_id: DocumentId,
        client_id: ClientId,
        author_id: AuthorId,
        base_version: Version,
    ) -> Self {
        Self {
            document_id,
            client_id,
            author_id,
            base_version,
            payload: None,
            awareness: None,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn with_awareness(mut self, awareness: impl Into<Vec<u8>>) -> Self {
        self.awareness = Some(awareness.into());
        self
    }
}

/// Serializes all submissions of a document through its session.
pub struct UpdateCoordinator<S, M> {
    store: S,
    merge: Arc<M>,
    registry: SessionRegistry<S>,
    scheduler: CommitScheduler<S, M>,
    max_payload_size: usize,
    append_timeout: Duration,
    auto_commit: bool,
}

impl<S, M> UpdateCoordinator<S, M>
where
    S: Store,
    M: Merge,
{
    pub(crate) fn new(
        store: S,
        merge: Arc<M>,
        registry: SessionRegistry<S>,
        scheduler: CommitScheduler<S, M>,
        config: &crate::Config,
    ) -> Self {
        Self {
            store,
            merge,
            registry,
            scheduler,
            max_payload_size: config.max_payload_size,
            append_timeout: config.append_timeout,
            auto_commit: config.auto_commit,
        }
    }

    /// Accept an update for a document.
    ///
    /// Payloads are assigned the next version of the document, durably stored and broadcast to
    /// all subscribers, in this order. Nothing is published and the version does not advance if
    /// storing fails. Awareness-only updates are relayed without touching the version.
    ///
    /// Returns the version of the stored revision, or the unchanged current version for
    /// awareness-only updates.
    pub async fn submit_update(&self, update: Update) -> Result<Version, SubmitError> {
        let session = self.registry.get_or_create(&update.document_id).await?;
        if !session.is_editable() {
            debug!(document_id = %update.document_id, client_id = %update.client_id, "rejected update, editing is off");
            return Err(SubmitError::NotEditable(update.document_id));
        }
        self.validate(&update)?;
        session.touch();

        let Update {
            document_id,
            client_id,
            author_id,
            base_version,
            payload,
            awareness,
        } = update;

        let Some(payload) = payload else {
            // Validation made sure there's at least an awareness signal.
            if let Some(awareness) = awareness {
                session.publish(DocumentEvent::AwarenessUpdated {
                    client_id,
                    payload: awareness,
                });
            }
            return Ok(session.current_version());
        };

        let revision_version = {
            let mut guard = session.lock_version().await;
            let current = guard.version();
            let version = current + 1;

            if base_version < current {
                debug!(%document_id, %client_id, base_version, current, "update based on stale version");
            } else if base_version > current {
                warn!(%document_id, %client_id, base_version, current, "update based on unknown version");
            }

            let revision = Revision::new(document_id, version, author_id, client_id, payload);
            match timeout(self.append_timeout, self.persist(&revision)).await {
                Ok(Ok(())) => (),
                Ok(Err(SubmitError::VersionConflict { document_id, version })) => {
                    error!(%document_id, version, "version was already taken in store");
                    self.resync(&session, &mut guard).await;
                    return Err(SubmitError::VersionConflict {
                        document_id,
                        version,
                    });
                }
                Ok(Err(err)) => {
                    warn!(document_id = %revision.document_id, version, "storing revision failed: {err}");
                    return Err(err);
                }
                Err(elapsed) => {
                    warn!(document_id = %revision.document_id, version, "storing revision timed out");
                    return Err(SubmitError::StorageFailure(Box::new(elapsed)));
                }
            }

            guard.advance(version);
            debug!(document_id = %revision.document_id, version, "accepted revision");
            session.publish(DocumentEvent::accepted(revision, awareness));
            version
        };

        if self.auto_commit {
            self.scheduler.request_commit(session);
        }

        Ok(revision_version)
    }

    fn validate(&self, update: &Update) -> Result<(), SubmitError> {
        if update.payload.is_none() && update.awareness.is_none() {
            return Err(SubmitError::MalformedPayload(
                "update carries neither payload nor awareness".into(),
            ));
        }

        if let Some(payload) = &update.payload {
            if payload.is_empty() {
                return Err(SubmitError::MalformedPayload("empty payload".into()));
            }
            if payload.len() > self.max_payload_size {
                return Err(SubmitError::MalformedPayload(format!(
                    "payload of {} bytes exceeds maximum of {} bytes",
                    payload.len(),
                    self.max_payload_size
                )));
            }
            self.merge
                .validate_update(payload)
                .map_err(|err| SubmitError::MalformedPayload(err.to_string()))?;
        }

        if let Some(awareness) = &update.awareness {
            if awareness.len() > self.max_payload_size {
                return Err(SubmitError::MalformedPayload(format!(
                    "awareness signal of {} bytes exceeds maximum of {} bytes",
                    awareness.len(),
                    self.max_payload_size
                )));
            }
        }

        Ok(())
    }

    /// Durably append the revision inside a transaction.
    async fn persist(&self, revision: &Revision) -> Result<(), SubmitError> {
        let permit = self.store.begin().await.map_err(storage_failure)?;

        match self.store.append_revision(revision).await {
            Ok(true) => self.store.commit(permit).await.map_err(storage_failure),
            Ok(false) => {
                self.rollback(permit).await;
                Err(SubmitError::VersionConflict {
                    document_id: revision.document_id.clone(),
                    version: revision.version,
                })
            }
            Err(err) => {
                self.rollback(permit).await;
                Err(storage_failure(err))
            }
        }
    }

    async fn rollback(&self, permit: S::Permit) {
        if let Err(err) = self.store.rollback(permit).await {
            warn!("rolling back revision append failed: {err}");
        }
    }

    /// Align the session with the store after it reported an already taken version.
    ///
    /// This happens when an append outlived its deadline but was stored after all.
    async fn resync(&self, session: &DocumentSession, guard: &mut VersionGuard<'_>) {
        match self.store.latest_version(session.document_id()).await {
            Ok(latest) if latest > guard.version() => {
                warn!(document_id = %session.document_id(), from = guard.version(), to = latest, "resynced version with store");
                guard.advance(latest);
            }
            Ok(_) => (),
            Err(err) => {
                warn!(document_id = %session.document_id(), "reading latest version failed: {err}");
            }
        }
    }
}

impl<S, M> Clone for UpdateCoordinator<S, M>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            merge: self.merge.clone(),
            registry: self.registry.clone(),
            scheduler: self.scheduler.clone(),
            max_payload_size: self.max_payload_size,
            append_timeout: self.append_timeout,
            auto_commit: self.auto_commit,
        }
    }
}

fn storage_failure<E>(err: E) -> SubmitError
where
    E: Error + Send + Sync + 'static,
{
    SubmitError::StorageFailure(Box::new(err))
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("editing is switched off for document {0}")]
    NotEditable(DocumentId),

    #[error("malformed update: {0}")]
    MalformedPayload(String),

    #[error("storing revision failed: {0}")]
    StorageFailure(#[source] Box<dyn Error + Send + Sync + 'static>),

    #[error("version {version} of document {document_id} was already taken")]
    VersionConflict {
        document_id: DocumentId,
        version: Version,
    },
}

impl From<RegistryError> for SubmitError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Store(err) => Self::StorageFailure(err),
        }
    }
}
