// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use quire_core::{DocumentId, Revision, Version};

use crate::memory::MemoryStore;
use crate::revisions::RevisionStore;

type RevisionLogs = HashMap<DocumentId, BTreeMap<Version, Revision>>;

#[derive(Clone, Debug, Default)]
pub struct RevisionMemoryStore {
    logs: Arc<RwLock<RevisionLogs>>,
}

impl RevisionMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, RevisionLogs> {
        self.logs.read().expect("acquire shared read access on store")
    }

    fn write(&self) -> RwLockWriteGuard<'_, RevisionLogs> {
        self.logs
            .write()
            .expect("acquire exclusive write access on store")
    }
}

impl RevisionStore for MemoryStore {
    type Error = Infallible;

    async fn append_revision(&self, revision: &Revision) -> Result<bool, Self::Error> {
        let mut logs = self.revisions.write();
        let log = logs.entry(revision.document_id.clone()).or_default();
        if log.contains_key(&revision.version) {
            return Ok(false);
        }
        log.insert(revision.version, revision.clone());
        Ok(true)
    }

    async fn get_revisions(
        &self,
        document_id: &DocumentId,
        from: Version,
        to: Option<Version>,
    ) -> Result<Vec<Revision>, Self::Error> {
        let to = to.unwrap_or(Version::MAX);
        if from > to {
            return Ok(vec![]);
        }

        let logs = self.revisions.read();
        let revisions = match logs.get(document_id) {
            Some(log) => log.range(from..=to).map(|(_, rev)| rev.clone()).collect(),
            None => vec![],
        };
        Ok(revisions)
    }

    async fn latest_version(&self, document_id: &DocumentId) -> Result<Version, Self::Error> {
        let logs = self.revisions.read();
        let latest = logs
            .get(document_id)
            .and_then(|log| log.last_key_value())
            .map(|(version, _)| *version)
            .unwrap_or_default();
        Ok(latest)
    }

    async fn prune_revisions(
        &self,
        document_id: &DocumentId,
        through: Version,
    ) -> Result<u64, Self::Error> {
        let mut logs = self.revisions.write();
        let Some(log) = logs.get_mut(document_id) else {
            return Ok(0);
        };

        let kept = log.split_off(&(through.saturating_add(1)));
        let pruned = log.len() as u64;
        *log = kept;
        Ok(pruned)
    }
}
