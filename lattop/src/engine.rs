//! # Aggregation Engine
//!
//! Turns scheduler sleep/wake transitions into cumulative latency per
//! (thread, call path) and keeps those totals ranked.
//!
//! ## Event Flow
//!
//! ```text
//! sleep hook ──► on_sleep_enter ──► PendingWaitTable.upsert
//!
//! wake hook  ──► on_wake_exit ──► PendingWaitTable.take_and_remove
//!                                      │
//!                                      ▼
//!                               LatencyIndex.find ──► new record / accumulate
//!                                      │
//!                                      ▼
//!                               RankingTree remove + reinsert
//! ```
//!
//! ## Locking
//!
//! One `spin::Mutex` guards all three containers and the allocator. Hooks
//! and reports both take it; nothing inside the critical section parks or
//! waits for memory.
//!
//! ## Failure Policy
//!
//! Allocation refusals never corrupt either index:
//! - no capture buffer or pending slot: the sleep is dropped
//! - no record: the wake's interval is dropped
//! - no rank entry: the record keeps its correct total but becomes
//!   `Unranked` until a later update for the same key links it again

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use spin::{Mutex, MutexGuard};
use std::collections::HashMap;

use crate::alloc::{Allocator, Budget};
use crate::clock::{Clock, MonotonicClock};
use crate::config::EngineConfig;
use crate::containers::{LatencyIndex, PendingWaitTable, RankingTree};
use crate::domain::{AllocSite, Comm, EngineError, InvariantViolation, Tid};
use crate::model::{LatencyKey, LatencyRecord, RankState, RecordId, StackTrace};
use crate::report::ReportingView;
use crate::stack::StackCapture;

/// Counters kept under the engine lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub sleeps: u64,
    pub wakes: u64,
    /// Wakes with no pending sleep (e.g. attached mid-sleep)
    pub unmatched_wakes: u64,
    /// Sleeps that replaced a stale pending entry
    pub superseded: u64,
    pub records_created: u64,
    /// Sleeps dropped for lack of a capture buffer or pending slot
    pub dropped_captures: u64,
    /// Intervals dropped for lack of a record
    pub dropped_records: u64,
    /// Records left unranked for lack of a rank entry
    pub rank_alloc_failures: u64,
    /// Ranked records whose entry could not be found
    pub consistency_faults: u64,
}

/// What a wake did to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// No sleep was pending for the thread.
    Unmatched,
    /// The interval was added to a record.
    Recorded { record: RecordId, elapsed: u64, total: u64, state: RankState },
}

/// Everything the lock protects.
pub(crate) struct EngineState {
    pub(crate) pending: PendingWaitTable,
    pub(crate) index: LatencyIndex,
    pub(crate) ranking: RankingTree,
    allocator: Box<dyn Allocator>,
    pub(crate) stats: EngineStats,
}

/// Process-wide aggregation state behind a single exclusive lock.
pub struct AggregationEngine<C: Clock = MonotonicClock> {
    state: Mutex<EngineState>,
    clock: C,
    report_limit: usize,
}

impl<C: Clock> AggregationEngine<C> {
    /// Build the fixed-size containers with the default [`Budget`] allocator.
    ///
    /// # Errors
    /// See [`with_allocator`](Self::with_allocator).
    pub fn new(config: &EngineConfig, clock: C) -> Result<Self, EngineError> {
        Self::with_allocator(config, clock, Box::new(Budget::new(config)))
    }

    /// Build the engine around a caller-supplied allocator.
    ///
    /// Container storage is reserved here in full, so the hooks never grow it.
    ///
    /// # Errors
    /// - `EngineError::InvalidConfig` if `config` fails validation.
    /// - `EngineError::OutOfMemory` if the containers cannot be reserved.
    pub fn with_allocator(
        config: &EngineConfig,
        clock: C,
        allocator: Box<dyn Allocator>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let state = EngineState {
            pending: PendingWaitTable::new(config.pending_buckets, config.max_pending)?,
            index: LatencyIndex::new(config.index_buckets, config.max_records)?,
            ranking: RankingTree::new(config.max_rank_entries)?,
            allocator,
            stats: EngineStats::default(),
        };
        info!(
            "Latency engine up: {} pending buckets, {} index buckets, {} records max",
            config.pending_buckets, config.index_buckets, config.max_records
        );
        Ok(Self {
            state: Mutex::new(state),
            clock,
            report_limit: config.report_limit,
        })
    }

    /// Sleep hook: `tid` is about to leave the run queue.
    ///
    /// Captures the thread's stack and records the start of the interval,
    /// replacing any stale pending entry for the same thread.
    ///
    /// # Errors
    /// Returns `EngineError::OutOfMemory` if the capture buffer or the
    /// pending slot was refused; no state changes in that case.
    pub fn on_sleep_enter(&self, tid: Tid, capture: &dyn StackCapture) -> Result<(), EngineError> {
        // The walk fills a fixed buffer; it is only charged once the lock is held
        let mut stack = StackTrace::new();
        capture.capture(tid, &mut stack);
        stack.terminate();
        let start = self.clock.now();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.stats.sleeps += 1;

        if let Err(err) = state.allocator.try_alloc(AllocSite::StackKey) {
            state.stats.dropped_captures += 1;
            warn!("Dropping sleep of {tid}: {err}");
            return Err(err.into());
        }

        let needs_slot = !state.pending.contains(tid);
        if needs_slot {
            if let Err(err) = state.allocator.try_alloc(AllocSite::PendingWait) {
                state.allocator.release(AllocSite::StackKey);
                state.stats.dropped_captures += 1;
                warn!("Dropping sleep of {tid}: {err}");
                return Err(err.into());
            }
        }

        match state.pending.upsert(tid, start, LatencyKey::new(tid, stack)) {
            Ok(Some(_superseded)) => {
                // The superseded entry's key is never referenced again
                state.allocator.release(AllocSite::StackKey);
                state.stats.superseded += 1;
            }
            Ok(None) => {}
            Err(err) => {
                state.allocator.release(AllocSite::StackKey);
                if needs_slot {
                    state.allocator.release(AllocSite::PendingWait);
                }
                state.stats.dropped_captures += 1;
                warn!("Dropping sleep of {tid}: {err}");
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Wake hook: `tid` has just been placed back on a run queue.
    ///
    /// `comm` is the process-name snapshot stored if this wake creates a
    /// new record.
    ///
    /// # Errors
    /// - `EngineError::OutOfMemory` if a new record was needed and refused;
    ///   the interval is dropped.
    /// - `EngineError::RankEntryMissing` if a ranked record's entry could not
    ///   be found; the record is left as it was.
    pub fn on_wake_exit(&self, tid: Tid, comm: Comm) -> Result<WakeOutcome, EngineError> {
        let now = self.clock.now();

        let mut guard = self.state.lock();
        let EngineState { pending, index, ranking, allocator, stats } = &mut *guard;
        stats.wakes += 1;

        let Some(wait) = pending.take_and_remove(tid) else {
            stats.unmatched_wakes += 1;
            debug!("Unmatched wake for {tid}");
            return Ok(WakeOutcome::Unmatched);
        };
        allocator.release(AllocSite::PendingWait);
        let elapsed = now.since(wait.start);

        if let Some((id, record)) = index.find_mut(&wait.key) {
            // The record already holds an equal key
            allocator.release(AllocSite::StackKey);
            return accumulate(ranking, &mut **allocator, stats, id, record, elapsed);
        }

        if let Err(err) = allocator.try_alloc(AllocSite::Record) {
            allocator.release(AllocSite::StackKey);
            stats.dropped_records += 1;
            warn!("Dropping {elapsed} cycles of {tid}: {err}");
            return Err(err.into());
        }

        let id = match index.insert(LatencyRecord::new(wait.key, comm, elapsed)) {
            Ok(id) => id,
            Err(err) => {
                allocator.release(AllocSite::Record);
                allocator.release(AllocSite::StackKey);
                stats.dropped_records += 1;
                warn!("Dropping {elapsed} cycles of {tid}: {err}");
                return Err(err.into());
            }
        };
        let state = link_rank(ranking, &mut **allocator, stats, id, elapsed, tid);
        if let Some(record) = index.get_mut(id) {
            record.state = state;
        }
        stats.records_created += 1;
        debug!("New record for {tid}: {elapsed} cycles ({state:?})");

        Ok(WakeOutcome::Recorded { record: id, elapsed, total: elapsed, state })
    }

    /// Read-only access for the report transport.
    #[must_use]
    pub fn view(&self) -> ReportingView<'_, C> {
        ReportingView::new(self)
    }

    /// The counter every hook reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Upper bound on entries per report.
    #[must_use]
    pub fn report_limit(&self) -> usize {
        self.report_limit
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.state.lock().stats
    }

    #[must_use]
    pub fn record_count(&self) -> usize {
        self.state.lock().index.len()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    #[must_use]
    pub fn ranked_count(&self) -> usize {
        self.state.lock().ranking.len()
    }

    /// Copy of the record behind `id`, if it exists.
    #[must_use]
    pub fn record(&self, id: RecordId) -> Option<LatencyRecord> {
        self.state.lock().index.get(id).cloned()
    }

    /// Check that the index and the ranking tree agree.
    ///
    /// Every ranked record has exactly one entry keyed by its current
    /// total, no unranked record has any, and every entry points at a
    /// record. Diagnostic only: walks everything under the lock.
    ///
    /// # Errors
    /// Returns the first violation found.
    pub fn verify(&self) -> Result<(), InvariantViolation> {
        let state = self.state.lock();

        let mut entries: HashMap<RecordId, Vec<u64>> = HashMap::new();
        for entry in state.ranking.descending(usize::MAX) {
            entries.entry(entry.record).or_default().push(entry.total);
        }

        for (id, record) in state.index.iter() {
            let tid = record.key.tid;
            let totals = entries.remove(&id).unwrap_or_default();
            match record.state {
                RankState::Ranked if totals.len() != 1 => {
                    return Err(InvariantViolation::RankedEntryCount { tid, count: totals.len() });
                }
                RankState::Ranked if totals[0] != record.total => {
                    return Err(InvariantViolation::StaleRankValue {
                        tid,
                        entry: totals[0],
                        total: record.total,
                    });
                }
                RankState::Unranked if !totals.is_empty() => {
                    return Err(InvariantViolation::UnrankedHasEntry { tid, count: totals.len() });
                }
                _ => {}
            }
        }

        let dangling: usize = entries.values().map(Vec::len).sum();
        if dangling > 0 {
            return Err(InvariantViolation::DanglingEntry { count: dangling });
        }
        Ok(())
    }

    /// Release every pending entry, rank entry and record.
    ///
    /// Safe to call repeatedly; later calls find nothing to release.
    pub fn teardown(&self) {
        let mut state = self.state.lock();
        // Rank entries go first: they reference records
        let ranked = state.ranking.remove_all();
        let records = state.index.remove_all();
        let pending = state.pending.remove_all();
        state.allocator.reset();

        if ranked + records + pending > 0 {
            info!("Released {records} records, {ranked} rank entries, {pending} pending sleeps");
        }
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock()
    }
}

/// Charge and link a rank entry for `id` at `total`.
///
/// A refusal from either the allocator or the tree is counted and logged,
/// never fatal: the record is simply left `Unranked`.
fn link_rank(
    ranking: &mut RankingTree,
    allocator: &mut dyn Allocator,
    stats: &mut EngineStats,
    id: RecordId,
    total: u64,
    tid: Tid,
) -> RankState {
    let linked = match allocator.try_alloc(AllocSite::RankEntry) {
        Ok(()) => ranking.insert(id, total).map_err(|err| {
            allocator.release(AllocSite::RankEntry);
            err
        }),
        Err(err) => Err(err),
    };
    match linked {
        Ok(_) => RankState::Ranked,
        Err(err) => {
            stats.rank_alloc_failures += 1;
            warn!("Record of {tid} left unranked: {err}");
            RankState::Unranked
        }
    }
}

/// Add `elapsed` to an existing record and move its rank entry.
fn accumulate(
    ranking: &mut RankingTree,
    allocator: &mut dyn Allocator,
    stats: &mut EngineStats,
    id: RecordId,
    record: &mut LatencyRecord,
    elapsed: u64,
) -> Result<WakeOutcome, EngineError> {
    let tid = record.key.tid;

    if record.state == RankState::Ranked {
        let Some(entry) = ranking.find_entry_for(id, record.total) else {
            stats.consistency_faults += 1;
            warn!("No rank entry for ranked record of {tid} at {} cycles", record.total);
            return Err(EngineError::RankEntryMissing { tid, total: record.total });
        };
        ranking.remove(entry);
        allocator.release(AllocSite::RankEntry);
        record.state = RankState::Unranked;
    }

    record.total = record.total.saturating_add(elapsed);
    record.state = link_rank(ranking, allocator, stats, id, record.total, tid);
    debug!("{tid} +{elapsed} cycles, total {} ({:?})", record.total, record.state);

    Ok(WakeOutcome::Recorded { record: id, elapsed, total: record.total, state: record.state })
}
