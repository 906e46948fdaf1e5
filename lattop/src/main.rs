//! # lattop - Main Entry Point
//!
//! Supports two operational modes:
//! - **Replay** (`lattop trace.jsonl`): feed a whole trace, print one report
//! - **Follow** (`lattop --follow -`): stream events, re-render every `--interval`

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::time::Duration;
use tokio::sync::mpsc;

use lattop::cli::Args;
use lattop::clock::ManualClock;
use lattop::domain::EngineError;
use lattop::replay::{ReplayStats, Replayer, TraceEvent};
use lattop::{AggregationEngine, ReportSnapshot};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<EngineError>() {
        Some(EngineError::InvalidConfig(_)) => EXIT_USAGE,
        _ => EXIT_ERROR,
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    let engine = AggregationEngine::new(&args.engine_config(), ManualClock::new(0))?;

    let replay_stats = if args.follow {
        let (stats, exit_reason) = follow(&args, &engine).await?;
        info!("Stopped following: {exit_reason}");
        stats
    } else {
        replay_once(&args, &engine)?
    };

    if !args.quiet {
        print_report(&engine, args.limit)?;
    }

    if args.diagnostics {
        let stats = engine.stats();
        eprintln!(
            "replay: {} events ({} sleeps, {} wakes, {} unmatched, {} dropped, {} faults)",
            replay_stats.events,
            replay_stats.sleeps,
            replay_stats.wakes,
            replay_stats.unmatched,
            replay_stats.dropped,
            replay_stats.faults,
        );
        eprintln!(
            "engine: {} records, {} ranked, {} pending, {} superseded, {} rank alloc failures, {} consistency faults",
            engine.record_count(),
            engine.ranked_count(),
            engine.pending_count(),
            stats.superseded,
            stats.rank_alloc_failures,
            stats.consistency_faults,
        );
        if let Err(violation) = engine.verify() {
            warn!("Index and ranking disagree: {violation}");
        }
    }

    if let Some(ref export_path) = args.export {
        let file = File::create(export_path)
            .with_context(|| format!("Failed to create {}", export_path.display()))?;
        ReportSnapshot::capture(&engine, args.limit)
            .export(BufWriter::new(file))
            .context("Failed to export report")?;
        if !args.quiet {
            eprintln!("saved: {}", export_path.display());
        }
    }

    engine.teardown();
    Ok(())
}

/// Replay the whole trace synchronously.
fn replay_once(args: &Args, engine: &AggregationEngine<ManualClock>) -> Result<ReplayStats> {
    let input: Box<dyn Read> = if args.reads_stdin() {
        Box::new(io::stdin().lock())
    } else {
        Box::new(
            File::open(&args.trace)
                .with_context(|| format!("Failed to open trace {}", args.trace.display()))?,
        )
    };
    let reader = BufReader::new(input);

    let mut replayer = Replayer::new(engine);
    let stats = if args.raw { replayer.replay_raw(reader) } else { replayer.replay_json(reader) };
    stats.context("Failed to replay trace")
}

/// Stream JSON lines until EOF, Ctrl+C or `--duration`, re-rendering on every tick.
async fn follow(
    args: &Args,
    engine: &AggregationEngine<ManualClock>,
) -> Result<(ReplayStats, &'static str)> {
    let input: Box<dyn BufRead + Send> = if args.reads_stdin() {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(
            File::open(&args.trace)
                .with_context(|| format!("Failed to open trace {}", args.trace.display()))?,
        ))
    };
    let mut lines = spawn_line_reader(input);
    let mut replayer = Replayer::new(engine);

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval));
    // The first tick completes immediately
    ticker.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    // Only polled when a duration was given
    let expiry = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(expiry);
    let mut line_no = 0;

    let exit_reason = loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    break "end of trace";
                };
                let text = line.context("Failed to read trace")?;
                line_no += 1;
                match TraceEvent::parse_line(line_no, &text) {
                    Ok(Some(event)) => replayer.apply(&event),
                    Ok(None) => {}
                    Err(e) => warn!("Skipping {e}"),
                }
            }
            _ = ticker.tick() => {
                if !args.quiet {
                    print_report(engine, args.limit)?;
                }
            }
            _ = &mut ctrl_c => {
                break "interrupted";
            }
            () = &mut expiry, if args.duration > 0 => {
                break "duration limit reached";
            }
        }
    };

    Ok((replayer.stats(), exit_reason))
}

/// Read `input` on its own thread so a silent stdin never holds up shutdown.
///
/// The channel closes after the last line or the first read error.
fn spawn_line_reader(input: Box<dyn BufRead + Send>) -> mpsc::Receiver<io::Result<String>> {
    let (line_tx, line_rx) = mpsc::channel(1000);
    std::thread::spawn(move || {
        for line in input.lines() {
            let failed = line.is_err();
            if line_tx.blocking_send(line).is_err() || failed {
                break;
            }
        }
    });
    line_rx
}

fn print_report(engine: &AggregationEngine<ManualClock>, limit: usize) -> Result<()> {
    let entries = engine.view().snapshot(limit);
    let mut out = BufWriter::new(io::stdout().lock());
    lattop::render_report(&entries, &mut out).context("Failed to write report")?;
    out.flush().context("Failed to write report")
}
