//! The in-memory snapshot: an ordered revision log of all watched entities.
//!
//! Every mutation stamps the affected entry with the next value of a global
//! revision counter and moves it to the tail of the log, so the log is always
//! ordered by revision and `changes_since` is a single ordered-map range
//! scan. Removed entities are retained as tombstones until every client that
//! referenced them has observed the removal.
//!
//! The snapshot is owned by the multiplexer loop; all mutation happens on
//! that one task, so no internal locking is needed.

use std::collections::BTreeMap;
use std::collections::HashMap;

use tracing::trace;

use crate::entity::Delta;
use crate::entity::EntityInfo;
use crate::entity::EntityKey;

/// The snapshot's unit of storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct EntityEntry {
    /// Revision at which this entry first appeared.
    pub(crate) creation_revno: u64,
    /// Revision of the entry's most recent mutation.
    pub(crate) revno: u64,
    /// The authoritative store no longer contains this key; the entry is
    /// retained for clients that have not yet observed the removal.
    pub(crate) removed: bool,
    /// Number of live client cursors referencing this entry.
    pub(crate) ref_count: u64,
    pub(crate) info: EntityInfo,
}

/// Ordered log of live entities with revision stamps and per-entry
/// refcounts.
#[derive(Debug, Default)]
pub struct Snapshot {
    latest_revno: u64,
    /// The revision log, ordered by each entry's current `revno`.
    log: BTreeMap<u64, EntityEntry>,
    /// EntityKey -> position (current revno) in the log.
    index: HashMap<EntityKey, u64>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// The revision of the most recent mutation, or 0 if none happened yet.
    pub fn latest_revno(&self) -> u64 {
        self.latest_revno
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Adds a new entity. The key must be absent.
    pub(crate) fn add(
        &mut self,
        info: EntityInfo,
    ) {
        let key = info.key();
        assert!(!self.index.contains_key(&key), "entity {key} already present");

        self.latest_revno += 1;
        let revno = self.latest_revno;
        self.log.insert(
            revno,
            EntityEntry {
                creation_revno: revno,
                revno,
                removed: false,
                ref_count: 0,
                info,
            },
        );
        self.index.insert(key, revno);
    }

    /// Records the latest observed value of an entity, adding it if it is
    /// not currently in the snapshot. The entry is restamped, moved to the
    /// tail and stripped of any tombstone mark.
    pub fn update(
        &mut self,
        info: EntityInfo,
    ) {
        let key = info.key();
        let Some(&pos) = self.index.get(&key) else {
            self.add(info);
            return;
        };

        let mut entry = self.log.remove(&pos).expect("index out of sync with log");
        self.latest_revno += 1;
        entry.revno = self.latest_revno;
        entry.info = info;
        entry.removed = false;
        self.index.insert(key, self.latest_revno);
        self.log.insert(self.latest_revno, entry);
    }

    /// Records that the authoritative store no longer contains the key.
    ///
    /// An unreferenced entry is dropped outright; a referenced one becomes a
    /// tombstone at the tail of the log. Absent or already-removed keys are
    /// left alone.
    pub fn mark_removed(
        &mut self,
        key: &EntityKey,
    ) {
        let Some(&pos) = self.index.get(key) else {
            return;
        };

        let entry = self.log.get(&pos).expect("index out of sync with log");
        if entry.removed {
            return;
        }
        self.latest_revno += 1;
        if entry.ref_count == 0 {
            trace!(%key, "removing unreferenced entity");
            self.delete(key);
            return;
        }

        let mut entry = self.log.remove(&pos).expect("index out of sync with log");
        entry.revno = self.latest_revno;
        entry.removed = true;
        self.index.insert(key.clone(), self.latest_revno);
        self.log.insert(self.latest_revno, entry);
    }

    /// Unlinks an entry from the log and index. Never touches
    /// `latest_revno`; outside of tests this only runs once a tombstone's
    /// refcount reaches zero.
    pub(crate) fn delete(
        &mut self,
        key: &EntityKey,
    ) {
        let Some(pos) = self.index.remove(key) else {
            return;
        };
        self.log.remove(&pos);
    }

    pub(crate) fn inc_ref(
        &mut self,
        key: &EntityKey,
    ) {
        let pos = self.index[key];
        let entry = self.log.get_mut(&pos).expect("index out of sync with log");
        entry.ref_count += 1;
    }

    /// Releases one reference; a tombstone reaching zero references is
    /// deleted from the snapshot.
    pub(crate) fn dec_ref(
        &mut self,
        key: &EntityKey,
    ) {
        let pos = self.index[key];
        let entry = self.log.get_mut(&pos).expect("index out of sync with log");
        entry.ref_count = entry
            .ref_count
            .checked_sub(1)
            .unwrap_or_else(|| panic!("negative reference count for {key}"));
        if entry.ref_count == 0 && entry.removed {
            trace!(%key, "collecting tombstone");
            self.delete(key);
        }
    }

    /// Deltas for every entry mutated after `revno`, in revision order.
    ///
    /// Tombstones created after `revno` are filtered out: a client that
    /// never saw the entity must not be told it was removed.
    pub fn changes_since(
        &self,
        revno: u64,
    ) -> Vec<Delta> {
        self.log
            .range(revno.saturating_add(1)..)
            .filter(|(_, entry)| !(entry.removed && entry.creation_revno > revno))
            .map(|(_, entry)| Delta {
                entity: entry.info.clone(),
                removed: entry.removed,
            })
            .collect()
    }

    /// Reconciles refcounts after `deltas` (a `changes_since(cursor)`
    /// result) has been delivered to a client whose cursor was `cursor`.
    ///
    /// First sight of a live entry takes a reference; a delivered removal
    /// releases the one the client was holding.
    pub(crate) fn seen(
        &mut self,
        cursor: u64,
        deltas: &[Delta],
    ) {
        for delta in deltas {
            let key = delta.entity.key();
            if delta.removed {
                self.dec_ref(&key);
                continue;
            }
            let pos = self.index[&key];
            let entry = self.log.get_mut(&pos).expect("index out of sync with log");
            if entry.creation_revno > cursor {
                entry.ref_count += 1;
            }
        }
    }

    /// Releases the references still held by a departing client whose
    /// cursor is `cursor`: every entry the client saw and was not yet
    /// delivered the removal of.
    pub(crate) fn leave(
        &mut self,
        cursor: u64,
    ) {
        let held: Vec<EntityKey> = self
            .log
            .values()
            .filter(|entry| {
                entry.creation_revno <= cursor && (!entry.removed || entry.revno > cursor)
            })
            .map(|entry| entry.info.key())
            .collect();
        for key in held {
            self.dec_ref(&key);
        }
    }

    /// Entries in log order, oldest mutation first.
    pub(crate) fn entries(&self) -> impl Iterator<Item = &EntityEntry> {
        self.log.values()
    }

    pub(crate) fn entry(
        &self,
        key: &EntityKey,
    ) -> Option<&EntityEntry> {
        self.index.get(key).map(|pos| &self.log[pos])
    }

    /// Structural invariants: revnos strictly increase along the log, the
    /// counter matches the tail, and the index maps every key to its entry.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut prev = 0;
        for (pos, entry) in &self.log {
            assert_eq!(*pos, entry.revno, "log position disagrees with entry revno");
            assert!(entry.revno > prev, "revnos not strictly increasing");
            assert!(entry.creation_revno <= entry.revno);
            prev = entry.revno;
        }
        let tail = self.log.keys().next_back().copied().unwrap_or(0);
        assert!(self.latest_revno >= tail, "latest revno behind the tail");
        assert_eq!(self.index.len(), self.log.len());
        for (key, pos) in &self.index {
            let entry = &self.log[pos];
            assert_eq!(&entry.info.key(), key, "index key disagrees with entry");
        }
    }
}
