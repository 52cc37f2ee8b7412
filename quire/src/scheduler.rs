// SPDX-License-Identifier: MIT OR Apache-2.0

//! Folding revision logs into committed documents.
//!
//! Commits are either requested, in which case they get debounced until edits to the document
//! settle, or executed right away. At most one commit is in flight per document. Every commit
//! folds the revisions following the last committed version up to a target version, which is
//! frozen the moment the commit starts. Revisions accepted meanwhile are left for the next
//! commit.
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use quire_core::{CommittedDocument, DocumentId, Version};
use thiserror::Error;
use tokio::task;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace, warn};

use crate::Store;
use crate::merge::Merge;
use crate::registry::{DocumentSession, RegistryError};

/// Outcome of trying to start a commit.
enum Attempt {
    /// Revisions up to this version are committed.
    Committed(Version),

    /// Another commit with this target is already in flight.
    InFlight(Version),
}

pub struct CommitScheduler<S, M> {
    store: S,
    merge: Arc<M>,
    debounce: Duration,
    max_delay: Duration,
    retry_delay: Duration,
    commit_timeout: Duration,
    prune_committed: bool,
}

impl<S, M> CommitScheduler<S, M>
where
    S: Store,
    M: Merge,
{
    pub(crate) fn new(store: S, merge: Arc<M>, config: &crate::Config) -> Self {
        Self {
            store,
            merge,
            debounce: config.commit_debounce,
            max_delay: config.max_commit_delay,
            retry_delay: config.commit_retry_delay,
            commit_timeout: config.commit_timeout,
            prune_committed: config.prune_committed,
        }
    }

    /// Request a commit of the document after the debounce period.
    ///
    /// The commit folds revisions up to the version current at the time of the request. Every
    /// request restarts the debounce period, requests arriving during it coalesce into one
    /// commit. Under continuous edits the commit still happens at latest `max_commit_delay` after
    /// the first request.
    pub fn request_commit(&self, session: Arc<DocumentSession>) {
        self.arm(session, self.debounce, Some(self.max_delay));
    }

    /// Spawn a timer committing up to the current version after the delay, unless a newer
    /// request superseded it.
    fn arm(&self, session: Arc<DocumentSession>, delay: Duration, max_delay: Option<Duration>) {
        let target = session.current_version();
        let (generation, delay) = session.arm_commit(delay, max_delay);
        let scheduler = self.clone();

        task::spawn(async move {
            sleep(delay).await;

            if !session.fire_commit(generation) {
                trace!(document_id = %session.document_id(), generation, "commit request superseded");
                return;
            }

            match scheduler.try_commit(&session, target).await {
                Ok(Attempt::Committed(_)) => (),
                Ok(Attempt::InFlight(in_flight)) => {
                    if in_flight < target {
                        scheduler.arm(session, scheduler.debounce, None);
                    }
                }
                Err(err) => {
                    warn!(
                        document_id = %session.document_id(),
                        target,
                        "commit failed, retrying in {:?}: {err}",
                        scheduler.retry_delay
                    );
                    scheduler.arm(session, scheduler.retry_delay, None);
                }
            }
        });
    }

    /// Commit all revisions up to the current version of the document right away.
    ///
    /// Returns the version the committed document covers. If another commit is already in flight
    /// its target version is returned without waiting for it.
    pub async fn commit_now(&self, session: &DocumentSession) -> Result<Version, CommitError> {
        match self.try_commit(session, session.current_version()).await? {
            Attempt::Committed(version) | Attempt::InFlight(version) => Ok(version),
        }
    }

    async fn try_commit(
        &self,
        session: &DocumentSession,
        target: Version,
    ) -> Result<Attempt, CommitError> {
        let _guard = match session.begin_commit(target) {
            Ok(guard) => guard,
            Err(in_flight) => return Ok(Attempt::InFlight(in_flight)),
        };

        let committed_through = timeout(
            self.commit_timeout,
            self.fold(session.document_id(), target),
        )
        .await
        .map_err(|_| CommitError::Timeout(self.commit_timeout))??;

        session.finish_commit(committed_through);
        Ok(Attempt::Committed(committed_through))
    }

    /// Fold all revisions following the committed document up to `target` into it.
    async fn fold(&self, document_id: &DocumentId, target: Version) -> Result<Version, CommitError> {
        let base = self
            .store
            .load_document(document_id)
            .await
            .map_err(store_error)?
            .unwrap_or_default();

        if target <= base.committed_through {
            trace!(%document_id, committed_through = base.committed_through, "nothing to commit");
            return Ok(base.committed_through);
        }

        let from = base.committed_through + 1;
        let revisions = self
            .store
            .get_revisions(document_id, from, Some(target))
            .await
            .map_err(store_error)?;

        let gapless = revisions
            .iter()
            .zip(from..=target)
            .all(|(revision, version)| revision.version == version);
        if !gapless || revisions.len() as u64 != target - base.committed_through {
            return Err(CommitError::MissingRevisions {
                document_id: document_id.clone(),
                from,
                to: target,
                found: revisions.len(),
            });
        }

        debug!(%document_id, from, to = target, "folding revisions");
        let merge = self.merge.clone();
        let content = task::spawn_blocking(move || merge.merge(&base.content, &revisions))
            .await
            .map_err(|err| CommitError::Aborted(err.to_string()))?
            .map_err(|err| CommitError::Merge(Box::new(err)))?;

        let document = CommittedDocument::new(content, target);
        let permit = self.store.begin().await.map_err(store_error)?;
        let result = self.save(document_id, &document).await;
        match result {
            Ok(()) => self.store.commit(permit).await.map_err(store_error)?,
            Err(err) => {
                if let Err(rollback_err) = self.store.rollback(permit).await {
                    warn!(%document_id, "rolling back commit failed: {rollback_err}");
                }
                return Err(err);
            }
        }

        debug!(%document_id, committed_through = target, "committed document");
        Ok(target)
    }

    /// Save the document and prune folded revisions, expected to run inside a transaction.
    async fn save(
        &self,
        document_id: &DocumentId,
        document: &CommittedDocument,
    ) -> Result<(), CommitError> {
        self.store
            .save_document(document_id, document)
            .await
            .map_err(store_error)?;

        if self.prune_committed {
            let pruned = self
                .store
                .prune_revisions(document_id, document.committed_through)
                .await
                .map_err(store_error)?;
            debug!(%document_id, pruned, "pruned committed revisions");
        }

        Ok(())
    }
}

impl<S, M> Clone for CommitScheduler<S, M>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            merge: self.merge.clone(),
            debounce: self.debounce,
            max_delay: self.max_delay,
            retry_delay: self.retry_delay,
            commit_timeout: self.commit_timeout,
            prune_committed: self.prune_committed,
        }
    }
}

fn store_error<E>(err: E) -> CommitError
where
    E: Error + Send + Sync + 'static,
{
    CommitError::Store(Box::new(err))
}

#[derive(Debug, Error)]
pub enum CommitError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("storage failed during commit: {0}")]
    Store(#[source] Box<dyn Error + Send + Sync + 'static>),

    #[error("merging revisions failed: {0}")]
    Merge(#[source] Box<dyn Error + Send + Sync + 'static>),

    #[error("merge task aborted: {0}")]
    Aborted(String),

    #[error("expected revisions {from} to {to} of document {document_id}, found {found}")]
    MissingRevisions {
        document_id: DocumentId,
        from: Version,
        to: Version,
        found: usize,
    },

    #[error("commit did not finish within {0:?}")]
    Timeout(Duration),
}
