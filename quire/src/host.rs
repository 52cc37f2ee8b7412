// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use quire_core::{DocumentId, Revision, Version};
use tokio::task;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info};

use crate::Store;
use crate::broadcast::Subscription;
use crate::config::Config;
use crate::coordinator::{SubmitError, Update, UpdateCoordinator};
use crate::merge::Merge;
use crate::registry::{DocumentSession, RegistryError, SessionRegistry};
use crate::scheduler::{CommitError, CommitScheduler};

/// Builder to configure and spawn a [`DocumentHost`].
pub struct Builder<S, M> {
    store: S,
    merge: M,
    config: Config,
}

impl<S, M> Builder<S, M>
where
    S: Store,
    M: Merge,
{
    pub fn new(store: S, merge: M) -> Self {
        Self {
            store,
            merge,
            config: Config::default(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Returns a host for documents.
    ///
    /// Spawns a background task evicting idle sessions if an eviction interval is configured,
    /// this needs to be called within a tokio runtime.
    pub fn spawn(self) -> DocumentHost<S, M> {
        let Self {
            store,
            merge,
            config,
        } = self;
        let merge = Arc::new(merge);

        let registry = SessionRegistry::new(
            store.clone(),
            config.broadcast_capacity,
            config.editable_by_default,
        );
        let scheduler = CommitScheduler::new(store.clone(), merge.clone(), &config);
        let coordinator = UpdateCoordinator::new(
            store.clone(),
            merge,
            registry.clone(),
            scheduler.clone(),
            &config,
        );

        let evictor = config.eviction_interval.map(|period| {
            let handle = task::spawn(evict_periodically(
                registry.clone(),
                period,
                config.idle_timeout,
            ));
            Arc::new(AbortOnDropHandle::new(handle))
        });

        info!(
            auto_commit = config.auto_commit,
            prune_committed = config.prune_committed,
            "started document host"
        );

        DocumentHost {
            store,
            registry,
            coordinator,
            scheduler,
            _evictor: evictor,
        }
    }
}

async fn evict_periodically<S>(registry: SessionRegistry<S>, period: Duration, idle: Duration)
where
    S: Store,
{
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let evicted = registry.evict_idle(idle);
        if evicted > 0 {
            debug!(evicted, remaining = registry.len(), "evicted idle sessions");
        }
    }
}

/// Hosts collaboratively edited documents.
///
/// Clients submit updates which get versioned, stored and broadcast to every subscriber of the
/// document. Revisions are folded into committed documents in the background or on demand.
///
/// The host can be cloned cheaply, all clones operate on the same sessions. The background
/// eviction task stops when the last clone is dropped.
pub struct DocumentHost<S, M> {
    store: S,
    registry: SessionRegistry<S>,
    coordinator: UpdateCoordinator<S, M>,
    scheduler: CommitScheduler<S, M>,
    _evictor: Option<Arc<AbortOnDropHandle<()>>>,
}

impl<S, M> DocumentHost<S, M>
where
    S: Store,
    M: Merge,
{
    pub fn builder(store: S, merge: M) -> Builder<S, M> {
        Builder::new(store, merge)
    }

    /// Submit an update of a client.
    ///
    /// See [`UpdateCoordinator::submit_update`] for details.
    pub async fn submit_update(&self, update: Update) -> Result<Version, SubmitError> {
        self.coordinator.submit_update(update).await
    }

    /// Subscribe to all future events of a document.
    pub async fn subscribe(&self, document_id: &DocumentId) -> Result<Subscription, RegistryError> {
        let session = self.registry.get_or_create(document_id).await?;
        Ok(Subscription::new(session))
    }

    /// Subscribe to future events of a document and return all stored revisions after the
    /// `last_seen` version.
    ///
    /// The returned revisions and the subscription don't overlap and leave no gap: the first
    /// revision received from the subscription directly follows the last returned revision.
    /// Revisions which were already pruned can not be returned anymore, clients need to load the
    /// committed document in that case.
    pub async fn subscribe_from(
        &self,
        document_id: &DocumentId,
        last_seen: Version,
    ) -> Result<(Vec<Revision>, Subscription), RegistryError> {
        let session = self.registry.get_or_create(document_id).await?;

        // Hold the version lock so no revision gets accepted between subscribing and reading.
        let guard = session.lock_version().await;
        let subscription = Subscription::new(session.clone());
        if last_seen >= guard.version() {
            return Ok((Vec::new(), subscription));
        }

        let revisions = self
            .store
            .get_revisions(document_id, last_seen + 1, Some(guard.version()))
            .await
            .map_err(|err| RegistryError::Store(Box::new(err)))?;
        drop(guard);

        Ok((revisions, subscription))
    }

    /// Stored revisions of a document in ascending version order, both bounds are inclusive.
    pub async fn list_revisions(
        &self,
        document_id: &DocumentId,
        from: Version,
        to: Option<Version>,
    ) -> Result<Vec<Revision>, RegistryError> {
        self.store
            .get_revisions(document_id, from, to)
            .await
            .map_err(|err| RegistryError::Store(Box::new(err)))
    }

    /// Latest accepted version of a document, `0` if it has no revisions.
    pub async fn current_version(&self, document_id: &DocumentId) -> Result<Version, RegistryError> {
        let session = self.registry.get_or_create(document_id).await?;
        Ok(session.current_version())
    }

    /// Request a debounced commit of a document.
    pub async fn request_commit(&self, document_id: &DocumentId) -> Result<(), RegistryError> {
        let session = self.registry.get_or_create(document_id).await?;
        self.scheduler.request_commit(session);
        Ok(())
    }

    /// Commit a document right away.
    ///
    /// See [`CommitScheduler::commit_now`] for details.
    pub async fn commit_now(&self, document_id: &DocumentId) -> Result<Version, CommitError> {
        let session = self.registry.get_or_create(document_id).await?;
        self.scheduler.commit_now(&session).await
    }

    /// Allow submissions to a document.
    pub async fn enable(&self, document_id: &DocumentId) -> Result<(), RegistryError> {
        self.registry.enable(document_id).await?;
        Ok(())
    }

    /// Reject all further submissions to a document with
    /// [`SubmitError::NotEditable`]. Existing subscriptions stay intact.
    pub fn disable(&self, document_id: &DocumentId) {
        self.registry.disable(document_id);
    }

    /// Evict sessions which were idle for at least the given duration, returns how many were
    /// evicted.
    pub fn evict_idle(&self, idle_threshold: Duration) -> usize {
        self.registry.evict_idle(idle_threshold)
    }

    /// Session of a document if it is currently held in memory.
    pub fn session(&self, document_id: &DocumentId) -> Option<Arc<DocumentSession>> {
        self.registry.get(document_id)
    }
}

impl<S, M> Clone for DocumentHost<S, M>
where
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            coordinator: self.coordinator.clone(),
            scheduler: self.scheduler.clone(),
            _evictor: self._evictor.clone(),
        }
    }
}
