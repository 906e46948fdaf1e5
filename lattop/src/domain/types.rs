//! Domain types providing compile-time safety and self-documentation
//!
//! These newtype wrappers keep thread IDs, counter readings and process
//! names from being mixed up with the plain integers around them.

use lattop_common::TASK_COMM_LEN;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Thread ID
///
/// The kernel-assigned ID of the thread making a sleep/wake transition.
/// Pending sleeps are keyed by this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

impl From<u32> for Tid {
    fn from(tid: u32) -> Self {
        Tid(tid)
    }
}

/// Monotonic cycle counter reading
///
/// Only differences between two readings are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Cycles elapsed since `earlier`.
    ///
    /// Counter wraparound is not handled; a reading older than `earlier`
    /// yields zero rather than a huge bogus interval.
    #[must_use]
    pub fn since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Process-name snapshot
///
/// Fixed-size like the kernel's `comm`, so taking a snapshot never
/// allocates. Names longer than `TASK_COMM_LEN - 1` bytes are truncated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Comm {
    bytes: [u8; TASK_COMM_LEN],
    len: u8,
}

impl Comm {
    /// Snapshot a name, truncating on a character boundary.
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(TASK_COMM_LEN - 1);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        Self::from_bytes(&name.as_bytes()[..end])
    }

    /// Snapshot raw bytes as written by a hook producer.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_bytes(raw: &[u8]) -> Self {
        let len = raw.len().min(TASK_COMM_LEN - 1);
        let mut bytes = [0u8; TASK_COMM_LEN];
        bytes[..len].copy_from_slice(&raw[..len]);
        Self { bytes, len: len as u8 }
    }

    /// The name bytes, without padding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }
}

impl fmt::Display for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for Comm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Comm({self})")
    }
}

/// Where a non-blocking allocation was attempted
///
/// Each site has its own capacity in the default [`Budget`](crate::alloc::Budget).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocSite {
    /// Capture buffer for a sleep's call stack
    StackKey,
    /// Entry in the pending-wait table
    PendingWait,
    /// Cumulative-latency record
    Record,
    /// Ranking-tree entry
    RankEntry,
}

impl AllocSite {
    /// Every site, in declaration order.
    pub const ALL: [AllocSite; 4] =
        [AllocSite::StackKey, AllocSite::PendingWait, AllocSite::Record, AllocSite::RankEntry];

    pub(crate) fn index(self) -> usize {
        match self {
            AllocSite::StackKey => 0,
            AllocSite::PendingWait => 1,
            AllocSite::Record => 2,
            AllocSite::RankEntry => 3,
        }
    }
}

impl fmt::Display for AllocSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AllocSite::StackKey => "stack key",
            AllocSite::PendingWait => "pending wait",
            AllocSite::Record => "latency record",
            AllocSite::RankEntry => "rank entry",
        };
        f.write_str(name)
    }
}
