//! Drives the engine's hooks from a recorded trace.
//!
//! Two input formats are accepted:
//!
//! - JSON lines, one transition per line:
//!   `{"event":"sleep","tid":5,"ts":100,"stack":[4194595]}` and
//!   `{"event":"wake","tid":5,"ts":140,"comm":"nginx"}`.
//!   Blank lines and lines starting with `#` are skipped.
//! - Raw [`HookEvent`] records, back to back, as a hook producer writes them.
//!
//! Each event sets the engine's [`ManualClock`] to the event timestamp before
//! the hook runs, so intervals come out exactly as recorded.

use lattop_common::{HookEvent, HOOK_EVENT_SIZE, HOOK_SLEEP_ENTER, HOOK_WAKE_EXIT};
use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Read};

use crate::clock::ManualClock;
use crate::domain::{Comm, EngineError, ReplayError, Tid};
use crate::engine::{AggregationEngine, WakeOutcome};
use crate::stack::RecordedStack;

/// One scheduler transition from a trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TraceEvent {
    Sleep {
        tid: u32,
        ts: u64,
        #[serde(default)]
        stack: Vec<u64>,
    },
    Wake {
        tid: u32,
        ts: u64,
        #[serde(default)]
        comm: String,
    },
}

impl TraceEvent {
    /// Parse one JSON line. `Ok(None)` for blank and comment lines.
    ///
    /// # Errors
    /// Returns `ReplayError::Parse` carrying the 1-based `line` number.
    pub fn parse_line(line: usize, text: &str) -> Result<Option<Self>, ReplayError> {
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            return Ok(None);
        }
        serde_json::from_str(text)
            .map(Some)
            .map_err(|source| ReplayError::Parse { line, source })
    }
}

impl TryFrom<&HookEvent> for TraceEvent {
    type Error = ReplayError;

    fn try_from(raw: &HookEvent) -> Result<Self, Self::Error> {
        match raw.kind {
            HOOK_SLEEP_ENTER => Ok(TraceEvent::Sleep {
                tid: raw.tid,
                ts: raw.timestamp,
                stack: raw.frames().to_vec(),
            }),
            HOOK_WAKE_EXIT => Ok(TraceEvent::Wake {
                tid: raw.tid,
                ts: raw.timestamp,
                comm: String::from_utf8_lossy(raw.comm_bytes()).into_owned(),
            }),
            kind => Err(ReplayError::UnknownHookKind { kind, tid: Tid(raw.tid) }),
        }
    }
}

/// What a replay did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    pub events: u64,
    pub sleeps: u64,
    pub wakes: u64,
    pub unmatched: u64,
    /// Events the engine refused for lack of memory
    pub dropped: u64,
    /// Consistency faults reported by the engine
    pub faults: u64,
}

/// Feeds trace events into an engine's hooks.
pub struct Replayer<'a> {
    engine: &'a AggregationEngine<ManualClock>,
    stats: ReplayStats,
}

impl<'a> Replayer<'a> {
    #[must_use]
    pub fn new(engine: &'a AggregationEngine<ManualClock>) -> Self {
        Self { engine, stats: ReplayStats::default() }
    }

    #[must_use]
    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    /// Run the hook for one event. Engine errors are counted, never returned.
    pub fn apply(&mut self, event: &TraceEvent) {
        self.stats.events += 1;
        let engine = self.engine;
        let clock = engine.clock();

        match event {
            TraceEvent::Sleep { tid, ts, stack } => {
                self.stats.sleeps += 1;
                clock.set(*ts);
                if let Err(err) = engine.on_sleep_enter(Tid(*tid), &RecordedStack(stack)) {
                    self.count_error(&err);
                }
            }
            TraceEvent::Wake { tid, ts, comm } => {
                self.stats.wakes += 1;
                clock.set(*ts);
                match engine.on_wake_exit(Tid(*tid), Comm::new(comm)) {
                    Ok(WakeOutcome::Unmatched) => self.stats.unmatched += 1,
                    Ok(WakeOutcome::Recorded { .. }) => {}
                    Err(err) => self.count_error(&err),
                }
            }
        }
    }

    fn count_error(&mut self, err: &EngineError) {
        debug!("Replay event {} not applied: {err}", self.stats.events);
        match err {
            EngineError::OutOfMemory(_) => self.stats.dropped += 1,
            EngineError::RankEntryMissing { .. } | EngineError::InvalidConfig(_) => {
                self.stats.faults += 1;
            }
        }
    }

    /// Replay a JSON-lines trace to the end.
    ///
    /// # Errors
    /// Stops at the first unreadable or unparsable line.
    pub fn replay_json<R: BufRead>(&mut self, reader: R) -> Result<ReplayStats, ReplayError> {
        for (idx, line) in reader.lines().enumerate() {
            if let Some(event) = TraceEvent::parse_line(idx + 1, &line?)? {
                self.apply(&event);
            }
        }
        Ok(self.stats)
    }

    /// Replay back-to-back raw hook records to the end.
    ///
    /// # Errors
    /// Returns `ReplayError::TruncatedRecord` if the input ends mid-record and
    /// `ReplayError::UnknownHookKind` for a record of neither hook kind.
    pub fn replay_raw<R: Read>(&mut self, mut reader: R) -> Result<ReplayStats, ReplayError> {
        let mut buf = [0u8; HOOK_EVENT_SIZE];
        loop {
            let got = read_record(&mut reader, &mut buf)?;
            if got == 0 {
                break;
            }
            let raw = HookEvent::decode(&buf[..got]).ok_or(ReplayError::TruncatedRecord {
                got,
                expected: HOOK_EVENT_SIZE,
            })?;
            self.apply(&TraceEvent::try_from(&raw)?);
        }
        Ok(self.stats)
    }
}

/// Fill `buf` from `reader`, stopping early only at end of input.
fn read_record<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, ReplayError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn engine() -> AggregationEngine<ManualClock> {
        AggregationEngine::new(&EngineConfig::default(), ManualClock::new(0)).unwrap()
    }

    fn raw(kind: u32, tid: u32, timestamp: u64, comm: &str, frames: &[u64]) -> [u8; HOOK_EVENT_SIZE] {
        let mut event = HookEvent { kind, tid, timestamp, ..HookEvent::default() };
        event.comm[..comm.len()].copy_from_slice(comm.as_bytes());
        event.entries[..frames.len()].copy_from_slice(frames);
        event.nr_entries = u32::try_from(frames.len()).unwrap();
        let mut out = [0u8; HOOK_EVENT_SIZE];
        event.encode(&mut out);
        out
    }

    #[test]
    fn test_parse_line_skips_blank_and_comments() {
        assert_eq!(TraceEvent::parse_line(1, "   ").unwrap(), None);
        assert_eq!(TraceEvent::parse_line(2, "# header").unwrap(), None);
        assert_eq!(
            TraceEvent::parse_line(3, r#"{"event":"wake","tid":5,"ts":140,"comm":"nginx"}"#)
                .unwrap(),
            Some(TraceEvent::Wake { tid: 5, ts: 140, comm: "nginx".to_string() })
        );
    }

    #[test]
    fn test_parse_line_reports_line_number() {
        let err = TraceEvent::parse_line(7, r#"{"event":"nap","tid":1}"#).unwrap_err();
        assert!(matches!(err, ReplayError::Parse { line: 7, .. }));
        assert!(err.to_string().contains("line 7"));
    }

    #[test]
    fn test_sleep_without_stack_defaults_empty() {
        let event = TraceEvent::parse_line(1, r#"{"event":"sleep","tid":1,"ts":0}"#).unwrap();
        assert_eq!(event, Some(TraceEvent::Sleep { tid: 1, ts: 0, stack: vec![] }));
    }

    #[test]
    fn test_replay_json_accumulates() {
        let trace = "\
# two intervals on one path, one unmatched wake
{\"event\":\"sleep\",\"tid\":5,\"ts\":0,\"stack\":[16,32]}
{\"event\":\"wake\",\"tid\":5,\"ts\":10,\"comm\":\"nginx\"}

{\"event\":\"wake\",\"tid\":9,\"ts\":11}
{\"event\":\"sleep\",\"tid\":5,\"ts\":20,\"stack\":[16,32]}
{\"event\":\"wake\",\"tid\":5,\"ts\":35,\"comm\":\"nginx\"}
";
        let engine = engine();
        let stats = Replayer::new(&engine).replay_json(trace.as_bytes()).unwrap();
        assert_eq!(stats.events, 5);
        assert_eq!(stats.unmatched, 1);

        let snapshot = engine.view().snapshot(10);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].cycles, 25);
        assert_eq!(snapshot[0].frames, vec![16, 32]);
    }

    #[test]
    fn test_replay_raw_records() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&raw(HOOK_SLEEP_ENTER, 5, 100, "", &[0x10, 0x20]));
        bytes.extend_from_slice(&raw(HOOK_WAKE_EXIT, 5, 140, "nginx", &[]));

        let engine = engine();
        let stats = Replayer::new(&engine).replay_raw(bytes.as_slice()).unwrap();
        assert_eq!(stats.events, 2);

        let snapshot = engine.view().snapshot(10);
        assert_eq!(snapshot[0].cycles, 40);
        assert_eq!(snapshot[0].comm, "nginx");
    }

    #[test]
    fn test_replay_raw_truncated() {
        let record = raw(HOOK_SLEEP_ENTER, 5, 100, "", &[0x10]);
        let engine = engine();
        let err = Replayer::new(&engine).replay_raw(&record[..HOOK_EVENT_SIZE - 3]).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::TruncatedRecord { got, expected } if got == HOOK_EVENT_SIZE - 3 && expected == HOOK_EVENT_SIZE
        ));
    }

    #[test]
    fn test_replay_raw_unknown_kind() {
        let record = raw(9, 5, 100, "", &[]);
        let engine = engine();
        let err = Replayer::new(&engine).replay_raw(record.as_slice()).unwrap_err();
        assert!(matches!(err, ReplayError::UnknownHookKind { kind: 9, tid: Tid(5) }));
    }
}
