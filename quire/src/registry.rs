// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory sessions of actively edited documents.
use std::collections::HashMap;
use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use quire_core::{DocumentId, Version};
use quire_store::{DocumentStore, RevisionStore};
use thiserror::Error;
use tokio::sync::{MutexGuard, broadcast};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::broadcast::DocumentEvent;

/// Live, in-memory state of one document.
///
/// A session exists at most once per document id. It is the single writer of the document: the
/// version lock serializes version allocation, durable append and broadcast of accepted
/// revisions.
#[derive(Debug)]
pub struct DocumentSession {
    document_id: DocumentId,

    /// Latest durably stored version. Holding the lock grants the right to allocate the next one.
    version: tokio::sync::Mutex<Version>,

    /// Lock-free mirror of `version` for readers.
    current_version: AtomicU64,

    editing_enabled: AtomicBool,

    committed_through: AtomicU64,

    commit: Mutex<CommitState>,

    last_activity: Mutex<Instant>,

    events_tx: broadcast::Sender<DocumentEvent>,
}

#[derive(Debug, Default)]
struct CommitState {
    /// Target version of the commit currently folding revisions.
    in_flight: Option<Version>,

    /// Incremented with every commit request, only the timer armed last executes.
    generation: u64,

    /// Number of commit timers which did not fire yet.
    armed: usize,

    /// When the oldest not yet committed revision was requested to be committed.
    dirty_since: Option<Instant>,
}

impl DocumentSession {
    fn new(
        document_id: DocumentId,
        version: Version,
        committed_through: Version,
        editing_enabled: bool,
        capacity: usize,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            document_id,
            version: tokio::sync::Mutex::new(version),
            current_version: AtomicU64::new(version),
            editing_enabled: AtomicBool::new(editing_enabled),
            committed_through: AtomicU64::new(committed_through),
            commit: Mutex::new(CommitState::default()),
            last_activity: Mutex::new(Instant::now()),
            events_tx,
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Latest accepted version, `0` if the document has no revisions yet.
    pub fn current_version(&self) -> Version {
        self.current_version.load(Ordering::SeqCst)
    }

    /// Highest version folded into the committed document.
    pub fn committed_through(&self) -> Version {
        self.committed_through.load(Ordering::SeqCst)
    }

    pub fn is_editable(&self) -> bool {
        self.editing_enabled.load(Ordering::SeqCst)
    }

    /// Returns `true` if a commit is currently executing or waiting for its debounce timer.
    pub fn is_commit_pending(&self) -> bool {
        let state = self.commit_state();
        state.in_flight.is_some() || state.armed > 0
    }

    /// Number of active subscriptions.
    pub fn subscribers(&self) -> usize {
        self.events_tx.receiver_count()
    }

    /// Point in time of the last submission or lookup.
    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .expect("acquire lock on session activity")
    }

    pub(crate) fn touch(&self) {
        *self
            .last_activity
            .lock()
            .expect("acquire lock on session activity") = Instant::now();
    }

    pub(crate) fn set_editable(&self, enabled: bool) {
        self.editing_enabled.store(enabled, Ordering::SeqCst);
    }

    /// Acquire the right to allocate the next version.
    pub(crate) async fn lock_version(&self) -> VersionGuard<'_> {
        VersionGuard {
            session: self,
            version: self.version.lock().await,
        }
    }

    pub(crate) fn events_rx(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events_tx.subscribe()
    }

    pub(crate) fn publish(&self, event: DocumentEvent) {
        // Sending only fails when nobody is subscribed, which is fine.
        let receivers = self.events_tx.send(event).unwrap_or_default();
        trace!(document_id = %self.document_id, receivers, "published document event");
    }

    fn commit_state(&self) -> std::sync::MutexGuard<'_, CommitState> {
        self.commit.lock().expect("acquire lock on commit state")
    }

    /// Register a new commit request.
    ///
    /// Returns the generation of this request and how long to wait before executing it. If
    /// given, the delay never exceeds the remaining time until `max_delay` passed since the first
    /// request which was not followed by a commit.
    pub(crate) fn arm_commit(
        &self,
        delay: Duration,
        max_delay: Option<Duration>,
    ) -> (u64, Duration) {
        let mut state = self.commit_state();
        let now = Instant::now();
        state.generation += 1;
        state.armed += 1;
        let dirty_since = *state.dirty_since.get_or_insert(now);
        let delay = match max_delay {
            Some(max_delay) => delay.min((dirty_since + max_delay).saturating_duration_since(now)),
            None => delay,
        };
        (state.generation, delay)
    }

    /// Mark an armed commit timer as fired. Returns `true` if no newer request superseded it.
    pub(crate) fn fire_commit(&self, generation: u64) -> bool {
        let mut state = self.commit_state();
        state.armed = state.armed.saturating_sub(1);
        state.generation == generation
    }

    /// Mark a commit folding revisions up to `target` as in flight.
    ///
    /// Fails with the target of the other commit if one is already executing.
    pub(crate) fn begin_commit(&self, target: Version) -> Result<CommitGuard<'_>, Version> {
        let mut state = self.commit_state();
        if let Some(in_flight) = state.in_flight {
            return Err(in_flight);
        }
        state.in_flight = Some(target);
        Ok(CommitGuard { session: self })
    }

    pub(crate) fn finish_commit(&self, committed_through: Version) {
        self.committed_through
            .fetch_max(committed_through, Ordering::SeqCst);
        // Revisions accepted while this commit was running open a new dirty window.
        let mut state = self.commit_state();
        if self.current_version() > committed_through {
            state.dirty_since = Some(Instant::now());
        } else {
            state.dirty_since = None;
        }
    }
}

/// Exclusive access to the version counter of a session.
pub(crate) struct VersionGuard<'a> {
    session: &'a DocumentSession,
    version: MutexGuard<'a, Version>,
}

impl VersionGuard<'_> {
    pub fn version(&self) -> Version {
        *self.version
    }

    /// Advance the version after the revision was durably stored.
    pub fn advance(&mut self, version: Version) {
        *self.version = version;
        self.session.current_version.store(version, Ordering::SeqCst);
    }
}

/// Clears the in-flight commit marker when dropped.
pub(crate) struct CommitGuard<'a> {
    session: &'a DocumentSession,
}

impl Drop for CommitGuard<'_> {
    fn drop(&mut self) {
        self.session.commit_state().in_flight = None;
    }
}

#[derive(Debug, Default)]
struct Sessions {
    active: HashMap<DocumentId, Arc<DocumentSession>>,

    /// Explicitly set editing state per document, kept across evictions.
    editing: HashMap<DocumentId, bool>,

    /// Incremented whenever sessions got evicted.
    evictions: u64,
}

/// Registry of document sessions.
///
/// Sessions are created on first use by hydrating the latest version from the store and evicted
/// again when idle.
#[derive(Clone, Debug)]
pub struct SessionRegistry<S> {
    store: S,
    sessions: Arc<RwLock<Sessions>>,
    broadcast_capacity: usize,
    editable_by_default: bool,
}

impl<S> SessionRegistry<S>
where
    S: RevisionStore + DocumentStore + Send + Sync,
{
    pub fn new(store: S, broadcast_capacity: usize, editable_by_default: bool) -> Self {
        Self {
            store,
            sessions: Arc::default(),
            broadcast_capacity,
            editable_by_default,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Sessions> {
        self.sessions
            .read()
            .expect("acquire shared read access on sessions")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Sessions> {
        self.sessions
            .write()
            .expect("acquire exclusive write access on sessions")
    }

    /// Returns the session of a document if it is currently in memory.
    pub fn get(&self, document_id: &DocumentId) -> Option<Arc<DocumentSession>> {
        self.read().active.get(document_id).cloned()
    }

    /// Returns the session of a document, hydrating it from the store if it is not in memory.
    pub async fn get_or_create(
        &self,
        document_id: &DocumentId,
    ) -> Result<Arc<DocumentSession>, RegistryError> {
        loop {
            let evictions = {
                let sessions = self.read();
                if let Some(session) = sessions.active.get(document_id) {
                    session.touch();
                    return Ok(session.clone());
                }
                sessions.evictions
            };

            let (version, committed_through) = self.hydrate(document_id).await?;

            let mut sessions = self.write();
            if let Some(session) = sessions.active.get(document_id) {
                session.touch();
                return Ok(session.clone());
            }

            // An evicted session might have accepted revisions after we've read the store.
            if sessions.evictions != evictions {
                continue;
            }

            let editable = sessions
                .editing
                .get(document_id)
                .copied()
                .unwrap_or(self.editable_by_default);
            let session = Arc::new(DocumentSession::new(
                document_id.clone(),
                version,
                committed_through,
                editable,
                self.broadcast_capacity,
            ));
            sessions
                .active
                .insert(document_id.clone(), session.clone());
            debug!(%document_id, version, committed_through, "hydrated document session");
            return Ok(session);
        }
    }

    async fn hydrate(&self, document_id: &DocumentId) -> Result<(Version, Version), RegistryError> {
        let latest = self
            .store
            .latest_version(document_id)
            .await
            .map_err(|err| RegistryError::Store(Box::new(err)))?;
        let committed_through = self
            .store
            .load_document(document_id)
            .await
            .map_err(|err| RegistryError::Store(Box::new(err)))?
            .map(|document| document.committed_through)
            .unwrap_or_default();

        // Pruned logs can be empty while the committed document still carries the version.
        Ok((latest.max(committed_through), committed_through))
    }

    /// Allow submissions to a document, the session gets created if it doesn't exist yet.
    pub async fn enable(
        &self,
        document_id: &DocumentId,
    ) -> Result<Arc<DocumentSession>, RegistryError> {
        self.set_editable(document_id, true);
        let session = self.get_or_create(document_id).await?;
        session.set_editable(true);
        Ok(session)
    }

    /// Reject all further submissions to a document. Subscriptions stay active.
    pub fn disable(&self, document_id: &DocumentId) {
        self.set_editable(document_id, false);
    }

    fn set_editable(&self, document_id: &DocumentId, enabled: bool) {
        let mut sessions = self.write();
        if enabled == self.editable_by_default {
            sessions.editing.remove(document_id);
        } else {
            sessions.editing.insert(document_id.clone(), enabled);
        }
        if let Some(session) = sessions.active.get(document_id) {
            session.set_editable(enabled);
        }
        debug!(%document_id, enabled, "changed editing state");
    }

    /// Remove sessions without activity for at least `idle_threshold` from memory.
    ///
    /// Sessions which are referenced elsewhere (subscriptions, in-flight submissions or commit
    /// timers) or have pending commits are never evicted. Returns the number of evicted sessions.
    pub fn evict_idle(&self, idle_threshold: Duration) -> usize {
        let mut sessions = self.write();
        let before = sessions.active.len();
        sessions.active.retain(|document_id, session| {
            let idle = session.last_activity().elapsed() >= idle_threshold;
            let evict = idle && Arc::strong_count(session) == 1 && !session.is_commit_pending();
            if evict {
                debug!(%document_id, version = session.current_version(), "evicted idle session");
            }
            !evict
        });

        let evicted = before - sessions.active.len();
        if evicted > 0 {
            sessions.evictions += 1;
        }
        evicted
    }

    /// Number of sessions in memory.
    pub fn len(&self) -> usize {
        self.read().active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("loading document state failed: {0}")]
    Store(#[source] Box<dyn Error + Send + Sync + 'static>),
}
