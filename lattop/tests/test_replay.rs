use lattop::clock::ManualClock;
use lattop::config::EngineConfig;
use lattop::domain::ReplayError;
use lattop::replay::Replayer;
use lattop::AggregationEngine;
use std::fs::File;
use std::io::BufReader;

fn replay(path: &str) -> (AggregationEngine<ManualClock>, Result<lattop::replay::ReplayStats, ReplayError>) {
    let engine = AggregationEngine::new(&EngineConfig::default(), ManualClock::new(0)).unwrap();
    let file = File::open(path).expect("fixture missing");
    let result = Replayer::new(&engine).replay_json(BufReader::new(file));
    (engine, result)
}

#[test]
fn test_basic_trace_report_text() {
    let (engine, result) = replay("tests/fixtures/basic.jsonl");
    let stats = result.expect("replay failed");

    assert_eq!(stats.events, 8);
    assert_eq!(stats.unmatched, 1);
    assert_eq!(engine.record_count(), 2);
    assert_eq!(engine.pending_count(), 1);

    let mut out = Vec::new();
    engine.view().render(&mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "## pid = 9, comm = redis, cycles = 100\n\
         \t0x500000\n\
         \n\
         ## pid = 5, comm = nginx, cycles = 55\n\
         \t0x400123\n\
         \t0x400456\n\
         \n"
    );
    engine.verify().unwrap();
}

#[test]
fn test_tied_totals_update_the_right_record() {
    let (engine, result) = replay("tests/fixtures/ties.jsonl");
    result.unwrap();

    let snapshot = engine.view().snapshot(10);
    let ranked: Vec<(u64, Vec<u64>)> =
        snapshot.into_iter().map(|e| (e.cycles, e.frames)).collect();
    assert_eq!(ranked, vec![(60, vec![16]), (50, vec![32])]);
    assert_eq!(engine.ranked_count(), 2);
    engine.verify().unwrap();
}

#[test]
fn test_malformed_line_reports_position() {
    let (engine, result) = replay("tests/fixtures/malformed.jsonl");
    let err = result.unwrap_err();
    assert!(matches!(err, ReplayError::Parse { line: 2, .. }), "unexpected error: {err}");
    // The sleep before the bad line was applied
    assert_eq!(engine.pending_count(), 1);
}

#[test]
fn test_teardown_after_replay_then_reuse() {
    let (engine, result) = replay("tests/fixtures/basic.jsonl");
    result.unwrap();

    engine.teardown();
    engine.teardown();
    assert_eq!(engine.record_count(), 0);
    assert_eq!(engine.pending_count(), 0);
    assert!(engine.view().snapshot(10).is_empty());

    let file = File::open("tests/fixtures/ties.jsonl").unwrap();
    Replayer::new(&engine).replay_json(BufReader::new(file)).unwrap();
    assert_eq!(engine.view().snapshot(10)[0].cycles, 60);
}
