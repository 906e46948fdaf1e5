//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

use crate::config::{EngineConfig, DEFAULT_BUCKETS, DEFAULT_REPORT_LIMIT};

#[derive(Parser, Debug)]
#[command(
    name = "lattop",
    version,
    about = "Rank per-thread call paths by cumulative sleep latency",
    after_help = "\
EXAMPLES:
    lattop trace.jsonl                       Replay a trace, print the report
    lattop --raw hooks.bin --limit 20        Replay raw hook records
    producer | lattop --follow -             Re-render every second from stdin
    lattop trace.jsonl --export top.json     Also write a JSON snapshot"
)]
pub struct Args {
    /// Trace to replay (`-` for stdin)
    #[arg(value_name = "TRACE")]
    pub trace: PathBuf,

    /// Input is raw hook records instead of JSON lines
    #[arg(long)]
    pub raw: bool,

    /// Keep reading and re-render the report periodically
    #[arg(short, long, conflicts_with = "raw")]
    pub follow: bool,

    /// Seconds between reports in follow mode
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: u64,

    /// Stop following after N seconds (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Maximum entries per report
    #[arg(short, long, default_value_t = DEFAULT_REPORT_LIMIT)]
    pub limit: usize,

    /// Export the final report as JSON
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Print engine counters after the report
    #[arg(long)]
    pub diagnostics: bool,

    /// Suppress the text report
    #[arg(short, long)]
    pub quiet: bool,

    /// Buckets in the pending-wait table
    #[arg(long, default_value_t = DEFAULT_BUCKETS)]
    pub pending_buckets: usize,

    /// Buckets in the latency index
    #[arg(long, default_value_t = DEFAULT_BUCKETS)]
    pub index_buckets: usize,

    /// Concurrently sleeping threads tracked
    #[arg(long, default_value = "4096")]
    pub max_pending: usize,

    /// Distinct (thread, call path) records kept
    #[arg(long, default_value = "65536")]
    pub max_records: usize,

    /// Ranking entries available
    #[arg(long, default_value = "65536")]
    pub max_rank_entries: usize,
}

impl Args {
    /// Engine sizing requested on the command line.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            pending_buckets: self.pending_buckets,
            index_buckets: self.index_buckets,
            max_pending: self.max_pending,
            max_records: self.max_records,
            max_rank_entries: self.max_rank_entries,
            report_limit: self.limit,
        }
    }

    /// Whether the trace comes from stdin.
    #[must_use]
    pub fn reads_stdin(&self) -> bool {
        self.trace.as_os_str() == "-"
    }
}
