//! Content-keyed table of cumulative-latency records.
//!
//! Records are stored in an arena and never removed before teardown, so a
//! [`RecordId`] stays valid for the whole session. Buckets are chosen by
//! thread ID; within a bucket, candidates are compared by full key content.

use super::{bucket_of, empty_heads, next_slot, reserve_slots};
use crate::domain::{AllocError, AllocSite};
use crate::model::{LatencyKey, LatencyRecord, RecordId};

#[derive(Debug)]
pub struct LatencyIndex {
    records: Vec<LatencyRecord>,
    /// Next record in the same bucket, parallel to `records`
    next: Vec<Option<u32>>,
    heads: Box<[Option<u32>]>,
    capacity: usize,
}

impl LatencyIndex {
    /// Reserve room for `capacity` records up front.
    ///
    /// # Errors
    /// Returns `AllocError` if the arena cannot be reserved.
    pub fn new(bucket_count: usize, capacity: usize) -> Result<Self, AllocError> {
        Ok(Self {
            records: reserve_slots(capacity, AllocSite::Record)?,
            next: reserve_slots(capacity, AllocSite::Record)?,
            heads: empty_heads(bucket_count),
            capacity,
        })
    }

    /// Locate the record whose key matches `key` by content.
    #[must_use]
    pub fn find(&self, key: &LatencyKey) -> Option<RecordId> {
        let mut cur = self.heads[bucket_of(key.tid, self.heads.len())];
        while let Some(slot) = cur {
            let id = RecordId(slot);
            if self.records[id.slot()].key.matches(key) {
                return Some(id);
            }
            cur = self.next[id.slot()];
        }
        None
    }

    /// Like [`find`](Self::find), also handing back the record for update.
    pub fn find_mut(&mut self, key: &LatencyKey) -> Option<(RecordId, &mut LatencyRecord)> {
        let id = self.find(key)?;
        Some((id, &mut self.records[id.slot()]))
    }

    /// Add a new record. The caller guarantees no record with an equal key exists.
    ///
    /// # Errors
    /// Returns `AllocError` once every reserved slot is in use.
    pub fn insert(&mut self, record: LatencyRecord) -> Result<RecordId, AllocError> {
        let slot = next_slot(self.records.len(), self.capacity, AllocSite::Record)?;
        let bucket = bucket_of(record.key.tid, self.heads.len());
        self.records.push(record);
        self.next.push(self.heads[bucket]);
        self.heads[bucket] = Some(slot);
        Ok(RecordId(slot))
    }

    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&LatencyRecord> {
        self.records.get(id.slot())
    }

    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut LatencyRecord> {
        self.records.get_mut(id.slot())
    }

    /// Every record with its handle, in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (RecordId, &LatencyRecord)> {
        // Slots are numbered from zero and never exceed u32::MAX (see `insert`)
        (0..).zip(&self.records).map(|(slot, record)| (RecordId(slot), record))
    }

    /// Release every record (teardown only). Returns how many were released.
    pub fn remove_all(&mut self) -> usize {
        let released = self.records.len();
        self.records.clear();
        self.next.clear();
        self.heads.fill(None);
        released
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Comm, Tid};
    use crate::model::StackTrace;

    fn record(tid: u32, frames: &[u64], total: u64) -> LatencyRecord {
        LatencyRecord::new(
            LatencyKey::new(Tid(tid), StackTrace::from_frames(frames)),
            Comm::new("test"),
            total,
        )
    }

    #[test]
    fn test_find_by_content() {
        let mut index = LatencyIndex::new(64, 8).unwrap();
        let a = index.insert(record(5, &[0x10, 0x20], 40)).unwrap();
        let b = index.insert(record(5, &[0x10, 0x30], 7)).unwrap();

        let wanted = LatencyKey::new(Tid(5), StackTrace::from_frames(&[0x10, 0x30]));
        assert_eq!(index.find(&wanted), Some(b));
        assert_ne!(a, b);
        assert_eq!(index.get(b).unwrap().total, 7);
    }

    #[test]
    fn test_find_misses_other_thread() {
        let mut index = LatencyIndex::new(64, 8).unwrap();
        index.insert(record(5, &[0x10], 40)).unwrap();

        let wanted = LatencyKey::new(Tid(6), StackTrace::from_frames(&[0x10]));
        assert!(index.find(&wanted).is_none());
    }

    #[test]
    fn test_single_bucket_still_distinguishes_keys() {
        let mut index = LatencyIndex::new(1, 16).unwrap();
        for tid in 0..10 {
            index.insert(record(tid, &[0x10], u64::from(tid))).unwrap();
        }
        let wanted = LatencyKey::new(Tid(7), StackTrace::from_frames(&[0x10]));
        let id = index.find(&wanted).unwrap();
        assert_eq!(index.get(id).unwrap().total, 7);
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let mut index = LatencyIndex::new(4, 4).unwrap();
        let id = index.insert(record(1, &[0x1], 10)).unwrap();
        index.get_mut(id).unwrap().total += 5;
        assert_eq!(index.get(id).unwrap().total, 15);
    }

    #[test]
    fn test_filling_to_capacity_never_reallocates() {
        let capacity = 5000;
        let mut index = LatencyIndex::new(16, capacity).unwrap();
        let reserved = (index.records.capacity(), index.next.capacity());
        let arena = index.records.as_ptr();

        for tid in 0..u32::try_from(capacity).unwrap() {
            index.insert(record(tid, &[0x10], 1)).unwrap();
        }
        assert_eq!((index.records.capacity(), index.next.capacity()), reserved);
        assert_eq!(index.records.as_ptr(), arena);

        assert_eq!(
            index.insert(record(0, &[0x20], 1)),
            Err(AllocError { site: AllocSite::Record })
        );
        assert_eq!(index.len(), capacity);
    }

    #[test]
    fn test_remove_all_twice() {
        let mut index = LatencyIndex::new(4, 4).unwrap();
        index.insert(record(1, &[0x1], 10)).unwrap();
        assert_eq!(index.remove_all(), 1);
        assert_eq!(index.remove_all(), 0);
        assert!(index.is_empty());
        assert_eq!(index.iter().count(), 0);

        // Chains were reset along with the arena
        let wanted = LatencyKey::new(Tid(1), StackTrace::from_frames(&[0x1]));
        assert!(index.find(&wanted).is_none());
        index.insert(record(1, &[0x1], 3)).unwrap();
        assert_eq!(index.find(&wanted), Some(RecordId(0)));
    }
}
