//! Per-thread table of in-flight sleep intervals.

use log::debug;

use super::{bucket_of, empty_heads, next_slot, reserve_slots};
use crate::domain::{AllocError, AllocSite, Tid, Timestamp};
use crate::model::{LatencyKey, PendingWait};

#[derive(Debug)]
struct Slot {
    wait: Option<PendingWait>,
    next: Option<u32>,
}

/// Thread ID → pending sleep, at most one entry per thread.
#[derive(Debug)]
pub struct PendingWaitTable {
    heads: Box<[Option<u32>]>,
    slots: Vec<Slot>,
    /// Slots released by `take_and_remove`, reused before fresh ones
    free: Vec<u32>,
    capacity: usize,
    len: usize,
}

impl PendingWaitTable {
    /// Reserve room for `capacity` concurrently sleeping threads.
    ///
    /// # Errors
    /// Returns `AllocError` if the slots cannot be reserved.
    pub fn new(bucket_count: usize, capacity: usize) -> Result<Self, AllocError> {
        Ok(Self {
            heads: empty_heads(bucket_count),
            slots: reserve_slots(capacity, AllocSite::PendingWait)?,
            free: reserve_slots(capacity, AllocSite::PendingWait)?,
            capacity,
            len: 0,
        })
    }

    fn find_slot(&self, tid: Tid) -> Option<u32> {
        let mut cur = self.heads[bucket_of(tid, self.heads.len())];
        while let Some(i) = cur {
            let slot = &self.slots[i as usize];
            if slot.wait.as_ref().is_some_and(|w| w.tid == tid) {
                return Some(i);
            }
            cur = slot.next;
        }
        None
    }

    #[must_use]
    pub fn contains(&self, tid: Tid) -> bool {
        self.find_slot(tid).is_some()
    }

    /// Record a sleep for `tid`, replacing any stale entry.
    ///
    /// Returns the replaced entry so the caller can release its key.
    ///
    /// # Errors
    /// Returns `AllocError` if `tid` has no entry and every slot is in use.
    pub fn upsert(
        &mut self,
        tid: Tid,
        start: Timestamp,
        key: LatencyKey,
    ) -> Result<Option<PendingWait>, AllocError> {
        let fresh = PendingWait { tid, start, key };

        if let Some(i) = self.find_slot(tid) {
            debug!("{tid} slept again without waking, replacing pending entry");
            return Ok(self.slots[i as usize].wait.replace(fresh));
        }

        let bucket = bucket_of(tid, self.heads.len());
        let next = self.heads[bucket];
        let i = match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Slot { wait: Some(fresh), next };
                i
            }
            None => {
                let i = next_slot(self.slots.len(), self.capacity, AllocSite::PendingWait)?;
                self.slots.push(Slot { wait: Some(fresh), next });
                i
            }
        };
        self.heads[bucket] = Some(i);
        self.len += 1;
        Ok(None)
    }

    /// Remove and return the pending entry for `tid`, if any.
    pub fn take_and_remove(&mut self, tid: Tid) -> Option<PendingWait> {
        let bucket = bucket_of(tid, self.heads.len());
        let mut prev: Option<u32> = None;
        let mut cur = self.heads[bucket];

        while let Some(i) = cur {
            let next = self.slots[i as usize].next;
            if self.slots[i as usize].wait.as_ref().is_some_and(|w| w.tid == tid) {
                match prev {
                    None => self.heads[bucket] = next,
                    Some(p) => self.slots[p as usize].next = next,
                }
                let slot = &mut self.slots[i as usize];
                slot.next = None;
                self.free.push(i);
                self.len -= 1;
                return slot.wait.take();
            }
            prev = Some(i);
            cur = next;
        }
        None
    }

    /// Drop every entry. Returns how many were released.
    pub fn remove_all(&mut self) -> usize {
        let released = self.len;
        self.slots.clear();
        self.free.clear();
        self.heads.fill(None);
        self.len = 0;
        released
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
