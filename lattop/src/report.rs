//! Read-only report over the ranked records.
//!
//! A report is taken inside the same critical section the hooks use, so it
//! always sees a consistent ranking. Its length is capped to bound how long
//! the lock is held.
//!
//! Text format, one block per record:
//!
//! ```text
//! ## pid = 5, comm = nginx, cycles = 40
//! \t0x400123
//! \t0x400456
//!
//! ```

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use crate::clock::Clock;
use crate::domain::{ExportError, Tid};
use crate::engine::{AggregationEngine, EngineState, EngineStats};

/// One ranked record as seen by a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub tid: Tid,
    pub comm: String,
    /// Cumulative latency, in counter units
    pub cycles: u64,
    /// Captured addresses, innermost first, sentinel excluded
    pub frames: Vec<u64>,
}

/// Borrowed handle used by a report transport.
pub struct ReportingView<'a, C: Clock> {
    engine: &'a AggregationEngine<C>,
}

impl<'a, C: Clock> ReportingView<'a, C> {
    pub(crate) fn new(engine: &'a AggregationEngine<C>) -> Self {
        Self { engine }
    }

    /// Up to `limit` entries by descending cumulative latency.
    ///
    /// `limit` is clamped to the engine's report limit. Unranked records are
    /// not visible here until a later update links them.
    #[must_use]
    pub fn snapshot(&self, limit: usize) -> Vec<ReportEntry> {
        let limit = limit.min(self.engine.report_limit());
        entries_from(&self.engine.lock_state(), limit)
    }

    /// Render a full-length report in the text format.
    ///
    /// # Errors
    /// Propagates failures from `out`.
    pub fn render<W: Write>(&self, out: &mut W) -> io::Result<()> {
        render_report(&self.snapshot(self.engine.report_limit()), out)
    }
}

/// Up to `limit` ranked entries, read under a guard the caller already holds.
fn entries_from(state: &EngineState, limit: usize) -> Vec<ReportEntry> {
    state
        .ranking
        .descending(limit)
        .filter_map(|entry| {
            let record = state.index.get(entry.record)?;
            Some(ReportEntry {
                tid: record.key.tid,
                comm: record.comm.to_string(),
                cycles: entry.total,
                frames: record.key.stack.frames().collect(),
            })
        })
        .collect()
}

/// Write `entries` in the text report format.
///
/// # Errors
/// Propagates failures from `out`.
pub fn render_report<W: Write>(entries: &[ReportEntry], out: &mut W) -> io::Result<()> {
    for entry in entries {
        writeln!(out, "## pid = {}, comm = {}, cycles = {}", entry.tid.0, entry.comm, entry.cycles)?;
        for addr in &entry.frames {
            writeln!(out, "\t0x{addr:x}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Everything needed to reproduce a report offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSnapshot {
    pub version: String,
    pub records: usize,
    pub ranked: usize,
    pub pending: usize,
    pub stats: EngineStats,
    pub entries: Vec<ReportEntry>,
}

impl ReportSnapshot {
    /// Take a snapshot of up to `limit` entries plus the engine counters.
    ///
    /// Entries and counters come from one critical section, so they agree.
    #[must_use]
    pub fn capture<C: Clock>(engine: &AggregationEngine<C>, limit: usize) -> Self {
        let limit = limit.min(engine.report_limit());
        let state = engine.lock_state();
        let entries = entries_from(&state, limit);
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            records: state.index.len(),
            ranked: state.ranking.len(),
            pending: state.pending.len(),
            stats: state.stats,
            entries,
        }
    }

    /// Write the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    /// Returns `ExportError` if serialization or the write fails.
    pub fn export<W: Write>(&self, mut out: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(&mut out, self)?;
        writeln!(out)?;
        out.flush()?;
        Ok(())
    }

    /// Load a snapshot written by [`export`](Self::export).
    ///
    /// # Errors
    /// Returns `ExportError::Json` if the input is not a snapshot.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, ExportError> {
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::domain::Comm;
    use crate::stack::RecordedStack;

    fn populated() -> AggregationEngine<ManualClock> {
        let clock = ManualClock::new(0);
        let engine = AggregationEngine::new(&EngineConfig::default(), clock.clone()).unwrap();
        for (tid, stack, elapsed) in
            [(5, &[0x400_123u64, 0x400_456][..], 40), (6, &[0x500_000][..], 90), (7, &[][..], 10)]
        {
            clock.set(1000);
            engine.on_sleep_enter(Tid(tid), &RecordedStack(stack)).unwrap();
            clock.advance(elapsed);
            engine.on_wake_exit(Tid(tid), Comm::new("nginx")).unwrap();
        }
        engine
    }

    #[test]
    fn test_snapshot_is_descending_and_limited() {
        let engine = populated();
        let all: Vec<u64> = engine.view().snapshot(10).iter().map(|e| e.cycles).collect();
        assert_eq!(all, vec![90, 40, 10]);

        let top = engine.view().snapshot(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].tid, Tid(6));
        assert!(engine.view().snapshot(0).is_empty());
    }

    #[test]
    fn test_snapshot_clamped_to_report_limit() {
        let clock = ManualClock::new(0);
        let config = EngineConfig { report_limit: 1, ..EngineConfig::default() };
        let engine = AggregationEngine::new(&config, clock.clone()).unwrap();
        for tid in 1..=3 {
            engine.on_sleep_enter(Tid(tid), &RecordedStack(&[0x1])).unwrap();
            clock.advance(5);
            engine.on_wake_exit(Tid(tid), Comm::new("a")).unwrap();
        }
        assert_eq!(engine.view().snapshot(1000).len(), 1);
    }

    #[test]
    fn test_render_text_format() {
        let entries = vec![ReportEntry {
            tid: Tid(5),
            comm: "nginx".to_string(),
            cycles: 40,
            frames: vec![0x400_123, 0x400_456],
        }];
        let mut out = Vec::new();
        render_report(&entries, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "## pid = 5, comm = nginx, cycles = 40\n\t0x400123\n\t0x400456\n\n"
        );
    }

    #[test]
    fn test_render_empty_stack_has_header_only() {
        let engine = populated();
        let mut out = Vec::new();
        engine.view().render(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("## pid = 7, comm = nginx, cycles = 10\n\n"));
        assert_eq!(text.matches("## pid").count(), 3);
    }

    #[test]
    fn test_snapshot_export_reloads() {
        let engine = populated();
        let snapshot = ReportSnapshot::capture(&engine, 10);
        assert_eq!(snapshot.records, 3);
        assert_eq!(snapshot.ranked, 3);
        assert_eq!(snapshot.stats.records_created, 3);

        let mut buf = Vec::new();
        snapshot.export(&mut buf).unwrap();
        let loaded = ReportSnapshot::from_reader(buf.as_slice()).unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_capture_agrees_with_itself_under_load() {
        let clock = ManualClock::new(0);
        let engine = AggregationEngine::new(&EngineConfig::default(), clock.clone()).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for tid in 0..2000 {
                    engine.on_sleep_enter(Tid(tid), &RecordedStack(&[0x10])).unwrap();
                    clock.advance(1);
                    engine.on_wake_exit(Tid(tid), Comm::new("load")).unwrap();
                }
            });

            for _ in 0..200 {
                let snapshot = ReportSnapshot::capture(&engine, 50);
                assert_eq!(snapshot.entries.len(), snapshot.ranked.min(50));
                assert_eq!(snapshot.records, snapshot.ranked);
                assert_eq!(u64::try_from(snapshot.records).unwrap(), snapshot.stats.records_created);
            }
        });

        assert_eq!(ReportSnapshot::capture(&engine, 50).records, 2000);
    }
}
