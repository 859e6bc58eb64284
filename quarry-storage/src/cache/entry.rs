//! Entity cache: buffered entity snapshots and tombstones for one model.
//!
//! [`EntityCache`] is a plain data structure with no locking of its own;
//! [`super::CachedModel`] guards it. Every mutation draws a number from the
//! shared [`SequenceGenerator`], which is what flush eviction compares to
//! decide whether an entry changed after its snapshot was taken.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use quarry_core::{
    matches_all, BlockHeight, EntityId, FilterExpr, Row, Sequence, SequenceGenerator,
};

/// A buffered, not-yet-persisted snapshot of one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub id: EntityId,
    /// Full entity snapshot
    pub value: Row,
    /// Block height that produced this value
    pub height: BlockHeight,
    /// Global sequence of the write
    pub sequence: Sequence,
    /// Sequence of the first write of this id since it entered the cache;
    /// overwrites keep it so scans report insertion order.
    position: Sequence,
}

/// A buffered deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovedEntry {
    pub height: BlockHeight,
    pub sequence: Sequence,
}

/// Point-in-time copy of everything a flush is responsible for.
#[derive(Debug, Clone, Default)]
pub struct FlushSnapshot {
    pub height: BlockHeight,
    /// Live entries with `height <= self.height`, in sequence order
    pub entries: Vec<CacheEntry>,
    /// Tombstones with `height <= self.height`, in sequence order
    pub removed: Vec<(EntityId, RemovedEntry)>,
}

impl FlushSnapshot {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.removed.len()
    }

    /// Rows to upsert.
    pub fn rows(&self) -> Vec<Row> {
        self.entries.iter().map(|e| e.value.clone()).collect()
    }

    /// Ids to delete.
    pub fn removed_ids(&self) -> Vec<EntityId> {
        self.removed.iter().map(|(id, _)| id.clone()).collect()
    }
}

/// Per-model map from id to its most recent buffered write.
#[derive(Debug)]
pub struct EntityCache {
    entries: HashMap<EntityId, CacheEntry>,
    removed: HashMap<EntityId, RemovedEntry>,
    sequence: Arc<SequenceGenerator>,
}

impl EntityCache {
    pub fn new(sequence: Arc<SequenceGenerator>) -> Self {
        Self {
            entries: HashMap::new(),
            removed: HashMap::new(),
            sequence,
        }
    }

    /// Insert or overwrite the entry for `id`. Returns the assigned sequence.
    pub fn set(&mut self, id: EntityId, value: Row, height: BlockHeight) -> Sequence {
        let sequence = self.sequence.next();
        self.removed.remove(&id);
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.value = value;
                entry.height = height;
                entry.sequence = sequence;
            }
            None => {
                self.entries.insert(
                    id.clone(),
                    CacheEntry {
                        id,
                        value,
                        height,
                        sequence,
                        position: sequence,
                    },
                );
            }
        }
        sequence
    }

    /// Record a deletion of `id`, dropping any buffered value.
    pub fn remove(&mut self, id: EntityId, height: BlockHeight) -> Sequence {
        let sequence = self.sequence.next();
        self.entries.remove(&id);
        self.removed.insert(id, RemovedEntry { height, sequence });
        sequence
    }

    pub fn get(&self, id: &str) -> Option<&CacheEntry> {
        self.entries.get(id)
    }

    pub fn is_removed(&self, id: &str) -> bool {
        self.removed.contains_key(id)
    }

    /// Whether the cache is authoritative for `id` (live or removed).
    pub fn holds(&self, id: &str) -> bool {
        self.entries.contains_key(id) || self.removed.contains_key(id)
    }

    /// Entries whose value satisfies every filter, in insertion order.
    pub fn scan(&self, filters: &[FilterExpr]) -> Vec<&CacheEntry> {
        let mut matched: Vec<&CacheEntry> = self
            .entries
            .values()
            .filter(|e| matches_all(filters, &e.value))
            .collect();
        matched.sort_by_key(|e| e.position);
        matched
    }

    /// Every id the cache is authoritative for.
    pub fn held_ids(&self) -> BTreeSet<EntityId> {
        self.entries
            .keys()
            .chain(self.removed.keys())
            .cloned()
            .collect()
    }

    /// Live entry count.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.removed.is_empty()
    }

    /// Tombstone count.
    pub fn removed_len(&self) -> usize {
        self.removed.len()
    }

    /// Buffered writes a flush at `height` would cover; all of them when
    /// `height` is `None`.
    pub fn flushable_count(&self, height: Option<BlockHeight>) -> usize {
        let covered = |h: BlockHeight| height.map_or(true, |limit| h <= limit);
        self.entries.values().filter(|e| covered(e.height)).count()
            + self.removed.values().filter(|r| covered(r.height)).count()
    }

    /// Copy every entry and tombstone with `height <= height`.
    pub fn snapshot(&self, height: BlockHeight) -> FlushSnapshot {
        let mut entries: Vec<CacheEntry> = self
            .entries
            .values()
            .filter(|e| e.height <= height)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.sequence);

        let mut removed: Vec<(EntityId, RemovedEntry)> = self
            .removed
            .iter()
            .filter(|(_, r)| r.height <= height)
            .map(|(id, r)| (id.clone(), *r))
            .collect();
        removed.sort_by_key(|(_, r)| r.sequence);

        FlushSnapshot {
            height,
            entries,
            removed,
        }
    }

    /// Drop the snapshotted writes that are still current. An id written
    /// again after the snapshot carries a newer sequence and stays.
    /// Returns the number of evicted writes.
    pub fn evict(&mut self, snapshot: &FlushSnapshot) -> usize {
        let mut evicted = 0;
        for flushed in &snapshot.entries {
            if self
                .entries
                .get(&flushed.id)
                .is_some_and(|current| current.sequence == flushed.sequence)
            {
                self.entries.remove(&flushed.id);
                evicted += 1;
            }
        }
        for (id, flushed) in &snapshot.removed {
            if self
                .removed
                .get(id)
                .is_some_and(|current| current.sequence == flushed.sequence)
            {
                self.removed.remove(id);
                evicted += 1;
            }
        }
        evicted
    }

    /// Discard buffered writes without persisting them: everything when
    /// `height` is `None`, otherwise only writes above `height`.
    /// Returns the number of discarded writes.
    pub fn clear(&mut self, height: Option<BlockHeight>) -> usize {
        let before = self.entries.len() + self.removed.len();
        match height {
            None => {
                self.entries.clear();
                self.removed.clear();
            }
            Some(limit) => {
                self.entries.retain(|_, e| e.height <= limit);
                self.removed.retain(|_, r| r.height <= limit);
            }
        }
        before - (self.entries.len() + self.removed.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::row_from_pairs;
    use serde_json::json;

    fn cache() -> EntityCache {
        EntityCache::new(Arc::new(SequenceGenerator::new()))
    }

    fn row(id: &str, field1: i64) -> Row {
        row_from_pairs([("id", json!(id)), ("field1", json!(field1))])
    }

    #[test]
    fn test_set_overwrites_in_place() {
        let mut c = cache();
        let first = c.set("a".into(), row("a", 1), 1);
        let second = c.set("a".into(), row("a", 2), 3);

        assert!(second > first);
        assert_eq!(c.len(), 1);
        let entry = c.get("a").unwrap();
        assert_eq!(entry.value, row("a", 2));
        assert_eq!(entry.height, 3);
        assert_eq!(entry.sequence, second);
    }

    #[test]
    fn test_scan_keeps_insertion_order() {
        let mut c = cache();
        c.set("c".into(), row("c", 1), 1);
        c.set("a".into(), row("a", 1), 1);
        c.set("b".into(), row("b", 0), 1);
        c.set("c".into(), row("c", 1), 2);

        let ids: Vec<_> = c
            .scan(&[FilterExpr::eq("field1", json!(1))])
            .iter()
            .map(|e| e.id.clone())
            .collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn test_remove_and_set_are_exclusive() {
        let mut c = cache();
        c.set("a".into(), row("a", 1), 1);
        c.remove("a".into(), 2);
        assert!(c.get("a").is_none());
        assert!(c.is_removed("a"));
        assert!(c.holds("a"));

        c.set("a".into(), row("a", 5), 3);
        assert!(!c.is_removed("a"));
        assert_eq!(c.removed_len(), 0);
    }

    #[test]
    fn test_snapshot_and_evict_respect_newer_writes() {
        let mut c = cache();
        c.set("a".into(), row("a", 1), 1);
        c.set("b".into(), row("b", 1), 1);
        c.remove("x".into(), 1);
        c.set("late".into(), row("late", 1), 5);

        let snapshot = c.snapshot(2);
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.removed_ids(), vec!["x".to_string()]);

        // written again between snapshot and eviction
        c.set("b".into(), row("b", 9), 2);

        assert_eq!(c.evict(&snapshot), 2);
        assert!(c.get("a").is_none());
        assert_eq!(c.get("b").unwrap().value, row("b", 9));
        assert!(c.get("late").is_some());
        assert!(!c.is_removed("x"));
    }

    #[test]
    fn test_flushable_count_and_clear() {
        let mut c = cache();
        c.set("a".into(), row("a", 1), 1);
        c.set("b".into(), row("b", 1), 4);
        c.remove("c".into(), 6);

        assert_eq!(c.flushable_count(None), 3);
        assert_eq!(c.flushable_count(Some(4)), 2);

        assert_eq!(c.clear(Some(3)), 2);
        assert_eq!(c.held_ids().into_iter().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(c.clear(None), 1);
        assert!(c.is_empty());
    }
}
