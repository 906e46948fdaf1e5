//! Fixed-capacity containers behind the engine lock
//!
//! - [`PendingWaitTable`] - thread ID → in-flight sleep
//! - [`LatencyIndex`] - (thread, call path) → cumulative-latency record
//! - [`RankingTree`] - records ordered by cumulative latency
//!
//! None of these types lock anything themselves; the
//! [`AggregationEngine`](crate::engine::AggregationEngine) owns all three
//! behind one exclusive lock. Hash tables are created with a fixed bucket
//! count and never rehash.
//!
//! Storage is reserved once, at construction. Entries live in slot arrays
//! and hash chains are threaded through the slots, so an insert under the
//! lock never reallocates: once the reserved slots are used up it refuses
//! with an [`AllocError`].

pub mod index;
pub mod pending;
pub mod ranking;

pub use index::LatencyIndex;
pub use pending::PendingWaitTable;
pub use ranking::RankingTree;

use fnv::FnvHasher;
use std::hash::Hasher;

use crate::domain::{AllocError, AllocSite, Tid};

/// `count` empty chain heads.
fn empty_heads(count: usize) -> Box<[Option<u32>]> {
    vec![None; count.max(1)].into_boxed_slice()
}

/// Reserve room for exactly `capacity` slots, refusing instead of aborting.
fn reserve_slots<T>(capacity: usize, site: AllocSite) -> Result<Vec<T>, AllocError> {
    let mut slots = Vec::new();
    slots.try_reserve_exact(capacity).map_err(|_| AllocError { site })?;
    Ok(slots)
}

/// Index of the next slot in a table of `capacity`, if any is left.
fn next_slot(len: usize, capacity: usize, site: AllocSite) -> Result<u32, AllocError> {
    if len >= capacity {
        return Err(AllocError { site });
    }
    u32::try_from(len).map_err(|_| AllocError { site })
}

/// Bucket holding entries for `tid`.
#[allow(clippy::cast_possible_truncation)]
fn bucket_of(tid: Tid, buckets: usize) -> usize {
    let mut hasher = FnvHasher::default();
    hasher.write_u32(tid.0);
    (hasher.finish() % buckets as u64) as usize
}
