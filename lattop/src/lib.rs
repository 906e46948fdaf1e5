//! # lattop - Cumulative Sleep-Latency Aggregation
//!
//! lattop answers "which call paths make which threads wait the longest?".
//! Every time a thread leaves the run queue its call stack and a timestamp
//! are recorded; when it is placed back on a run queue the elapsed interval
//! is added to a running total for that (thread, call path) pair. The totals
//! are kept ordered so the worst offenders can be reported at any moment.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                Hook Producer (scheduler observer)               │
//! │        sleep-enter / wake-exit, or a recorded trace file        │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ HookEvent / JSON lines
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          lattop                                 │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────────────────────────────┐    │
//! │  │   Replayer   │──▶│         AggregationEngine            │    │
//! │  │   (replay)   │   │  ┌──────────┐ ┌────────┐ ┌─────────┐ │    │
//! │  └──────────────┘   │  │ Pending  │ │Latency │ │ Ranking │ │    │
//! │                     │  │ WaitTable│ │ Index  │ │  Tree   │ │    │
//! │                     │  └──────────┘ └────────┘ └─────────┘ │    │
//! │                     │          one spin::Mutex             │    │
//! │                     └──────────────────┬───────────────────┘    │
//! │                                        │                        │
//! │                                        ▼                        │
//! │                     ┌──────────────────────────────────────┐    │
//! │                     │   ReportingView (text / JSON)        │    │
//! │                     └──────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`engine`]: the two hooks, teardown, counters and an invariant check
//! - [`containers`]: the three fixed-bucket structures behind the lock
//! - [`report`]: ranked snapshots, the text report and JSON export
//! - [`replay`]: drives the hooks from JSON-lines or raw hook records
//! - [`alloc`]: non-blocking allocation budget consulted on the hot path
//! - [`clock`] / [`stack`]: counter and stack-capture collaborators
//! - [`model`]: stack traces, keys, records and rank entries
//! - [`domain`]: newtypes and error types
//! - [`config`] / [`cli`]: engine sizing and command-line parsing
//!
//! ## Failure Model
//!
//! Nothing on the hook path waits. When an allocation is refused the sample
//! or its ranking is dropped, never the latency already stored. A record
//! that could not be ranked keeps its total and is linked again on its next
//! successful update.
//!
//! ## Typical Usage
//!
//! ```bash
//! # Rank a recorded trace
//! lattop trace.jsonl
//!
//! # Stream from a producer, re-rendering every 2 seconds
//! producer | lattop --follow --interval 2 -
//! ```

pub mod alloc;
pub mod cli;
pub mod clock;
pub mod config;
pub mod containers;
pub mod domain;
pub mod engine;
pub mod model;
pub mod replay;
pub mod report;
pub mod stack;

pub use engine::{AggregationEngine, EngineStats, WakeOutcome};
pub use report::{render_report, ReportEntry, ReportSnapshot, ReportingView};
