//! Non-blocking allocation admission
//!
//! Every allocation the hook path performs asks an [`Allocator`] first.
//! The answer is immediate: an allocator never waits for memory to become
//! available, it refuses. The engine turns a refusal into the degrade
//! policy (drop the sample, or leave a record unranked).
//!
//! [`Budget`] is the default: fixed per-site capacities taken from
//! [`EngineConfig`](crate::config::EngineConfig).

use crate::config::EngineConfig;
use crate::domain::{AllocError, AllocSite};

/// Admission control for allocations made while holding the engine lock.
pub trait Allocator: Send {
    /// Reserve one object at `site`, or refuse without blocking.
    ///
    /// # Errors
    /// Returns `AllocError` when the object cannot be provided right now.
    fn try_alloc(&mut self, site: AllocSite) -> Result<(), AllocError>;

    /// Return one object previously reserved at `site`.
    fn release(&mut self, site: AllocSite);

    /// Forget every outstanding reservation (teardown).
    fn reset(&mut self);
}

/// Fixed-capacity allocator: one counter and one limit per site.
#[derive(Debug, Clone)]
pub struct Budget {
    limits: [usize; 4],
    in_use: [usize; 4],
}

impl Budget {
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        let mut limits = [0; 4];
        // Keys are held both by pending sleeps and by records
        limits[AllocSite::StackKey.index()] = config.max_pending.saturating_add(config.max_records);
        limits[AllocSite::PendingWait.index()] = config.max_pending;
        limits[AllocSite::Record.index()] = config.max_records;
        limits[AllocSite::RankEntry.index()] = config.max_rank_entries;
        Self { limits, in_use: [0; 4] }
    }

    /// Objects currently reserved at `site`.
    #[must_use]
    pub fn in_use(&self, site: AllocSite) -> usize {
        self.in_use[site.index()]
    }

    #[must_use]
    pub fn limit(&self, site: AllocSite) -> usize {
        self.limits[site.index()]
    }
}

impl Allocator for Budget {
    fn try_alloc(&mut self, site: AllocSite) -> Result<(), AllocError> {
        let i = site.index();
        if self.in_use[i] >= self.limits[i] {
            return Err(AllocError { site });
        }
        self.in_use[i] += 1;
        Ok(())
    }

    fn release(&mut self, site: AllocSite) {
        let slot = &mut self.in_use[site.index()];
        *slot = slot.saturating_sub(1);
    }

    fn reset(&mut self) {
        self.in_use = [0; 4];
    }
}
