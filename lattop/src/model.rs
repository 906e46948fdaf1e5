//! Data model shared by the aggregation containers
//!
//! - [`StackTrace`] / [`LatencyKey`] - identity of a (thread, call path) pair
//! - [`PendingWait`] - an in-flight sleep
//! - [`LatencyRecord`] - accumulated latency for one key
//! - [`RankEntry`] - a ranking-tree node handle
//!
//! Records live in the [`LatencyIndex`](crate::containers::LatencyIndex)
//! arena and are referred to by [`RecordId`]; rank entries carry a
//! `RecordId` back-reference and never own the record.

use lattop_common::{MAX_STACK_DEPTH, STACK_END};

use crate::domain::{Comm, Tid, Timestamp};

/// Bounded, ordered sequence of return addresses, innermost first.
///
/// When fewer than `MAX_STACK_DEPTH` frames were captured the sequence is
/// terminated by `STACK_END`; a full trace carries no sentinel.
#[derive(Clone, PartialEq, Eq)]
pub struct StackTrace {
    entries: [u64; MAX_STACK_DEPTH],
    nr_entries: usize,
}

impl StackTrace {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: [0; MAX_STACK_DEPTH], nr_entries: 0 }
    }

    /// Build a trace from recorded addresses, then terminate it.
    ///
    /// Addresses past `MAX_STACK_DEPTH` are dropped; a recorded sentinel
    /// ends the copy early.
    #[must_use]
    pub fn from_frames(frames: &[u64]) -> Self {
        let mut trace = Self::new();
        for &addr in frames {
            if addr == STACK_END || !trace.push(addr) {
                break;
            }
        }
        trace.terminate();
        trace
    }

    /// Append one address. Returns `false` once the trace is full.
    pub fn push(&mut self, addr: u64) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries[self.nr_entries] = addr;
        self.nr_entries += 1;
        true
    }

    /// Append the sentinel if there is room and it is not already there.
    pub fn terminate(&mut self) {
        if self.is_terminated() {
            return;
        }
        self.push(STACK_END);
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.nr_entries >= MAX_STACK_DEPTH
    }

    fn is_terminated(&self) -> bool {
        self.nr_entries > 0 && self.entries[self.nr_entries - 1] == STACK_END
    }

    /// Captured entries, sentinel included.
    #[must_use]
    pub fn entries(&self) -> &[u64] {
        &self.entries[..self.nr_entries]
    }

    /// Captured addresses up to (not including) the sentinel.
    pub fn frames(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries().iter().copied().take_while(|&addr| addr != STACK_END)
    }
}

impl Default for StackTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StackTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.frames().map(|addr| format!("0x{addr:x}"))).finish()
    }
}

/// Identity of a (thread, call path) pair.
#[derive(Debug, Clone)]
pub struct LatencyKey {
    pub tid: Tid,
    pub stack: StackTrace,
}

impl LatencyKey {
    #[must_use]
    pub fn new(tid: Tid, stack: StackTrace) -> Self {
        Self { tid, stack }
    }

    /// Content equality: same thread, and every captured entry up to the
    /// shorter sequence agrees.
    ///
    /// Both sequences carry their sentinel, so a shorter path never matches
    /// a longer one that shares its prefix.
    #[must_use]
    pub fn matches(&self, other: &LatencyKey) -> bool {
        self.tid == other.tid
            && self.stack.entries().iter().zip(other.stack.entries()).all(|(a, b)| a == b)
    }
}

/// An in-flight sleep interval for one thread.
#[derive(Debug, Clone)]
pub struct PendingWait {
    pub tid: Tid,
    pub start: Timestamp,
    pub key: LatencyKey,
}

/// Handle to a [`LatencyRecord`] inside the index arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub(crate) u32);

impl RecordId {
    pub(crate) fn slot(self) -> usize {
        self.0 as usize
    }
}

/// Whether a record is currently reflected in the ranking tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RankState {
    /// A live rank entry references the record.
    Ranked,
    /// Latency is correct but not ranked, after a refused allocation.
    Unranked,
}

/// Accumulated latency for one (thread, call path).
#[derive(Debug, Clone)]
pub struct LatencyRecord {
    pub key: LatencyKey,
    /// Process name at the time the record was created
    pub comm: Comm,
    /// Cumulative latency in cycles, never decreases
    pub total: u64,
    pub state: RankState,
}

impl LatencyRecord {
    /// A fresh record; it starts unranked until its first entry is linked.
    #[must_use]
    pub fn new(key: LatencyKey, comm: Comm, total: u64) -> Self {
        Self { key, comm, total, state: RankState::Unranked }
    }

    #[must_use]
    pub fn is_ranked(&self) -> bool {
        self.state == RankState::Ranked
    }
}

/// A ranking-tree node handle.
///
/// `total` is the ordering key; `seq` distinguishes entries that share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankEntry {
    pub total: u64,
    pub record: RecordId,
    pub(crate) seq: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(tid: u32, frames: &[u64]) -> LatencyKey {
        LatencyKey::new(Tid(tid), StackTrace::from_frames(frames))
    }

    #[test]
    fn test_from_frames_terminates() {
        let trace = StackTrace::from_frames(&[0x10, 0x20]);
        assert_eq!(trace.entries(), &[0x10, 0x20, STACK_END]);
        assert_eq!(trace.frames().collect::<Vec<_>>(), vec![0x10, 0x20]);
    }

    #[test]
    fn test_from_frames_stops_at_recorded_sentinel() {
        let trace = StackTrace::from_frames(&[0x10, STACK_END, 0x30]);
        assert_eq!(trace.entries(), &[0x10, STACK_END]);
    }

    #[test]
    fn test_full_trace_has_no_sentinel() {
        let frames: Vec<u64> = (1..=40).collect();
        let trace = StackTrace::from_frames(&frames);
        assert!(trace.is_full());
        assert_eq!(trace.entries().len(), MAX_STACK_DEPTH);
        assert_eq!(trace.frames().count(), MAX_STACK_DEPTH);
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut trace = StackTrace::from_frames(&[0x10]);
        trace.terminate();
        assert_eq!(trace.entries(), &[0x10, STACK_END]);
    }

    #[test]
    fn test_key_matches_same_thread_and_path() {
        assert!(key(5, &[0x10, 0x20]).matches(&key(5, &[0x10, 0x20])));
    }

    #[test]
    fn test_key_differs_by_thread() {
        assert!(!key(5, &[0x10, 0x20]).matches(&key(6, &[0x10, 0x20])));
    }

    #[test]
    fn test_key_prefix_does_not_match() {
        assert!(!key(5, &[0x10]).matches(&key(5, &[0x10, 0x20])));
        assert!(!key(5, &[0x10, 0x20]).matches(&key(5, &[0x10])));
    }

    #[test]
    fn test_new_record_starts_unranked() {
        let record = LatencyRecord::new(key(1, &[0x1]), Comm::new("sh"), 10);
        assert!(!record.is_ranked());
    }
}
