//! Integration test: JSONL trace runner
//!
//! Replays small JSONL traces end to end and checks the snapshot table,
//! the structured log stream and the abort path.
//!
//! Run: cargo test -p sweeprev-harness --test runner_test

use std::cell::RefCell;
use std::io::{BufWriter, Cursor, Write};
use std::rc::Rc;

use sweeprev_core::{Replay, ReplayConfig, ReplayError, RevokerKind};
use sweeprev_harness::structured_log::validate_log_line;
use sweeprev_harness::{LogEmitter, LogLevel, RunError, run_trace};

#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn text(&self) -> String {
        String::from_utf8(self.0.borrow().clone()).unwrap()
    }

    fn lines(&self) -> Vec<String> {
        self.text().lines().map(str::to_string).collect()
    }
}

const REUSE_TRACE: &str = r#"# reuse after free
{"timestamp_ns":0,"event":"allocated","stack":"malloc <- main","begin":4096,"end":4160}
{"timestamp_ns":0,"event":"freed","stack":"free <- main","begin":4096}

{"timestamp_ns":0,"event":"freed","stack":"free <- main","begin":20480}
{"timestamp_ns":2000000,"event":"allocated","stack":"malloc <- main","begin":4096,"end":4112}
"#;

fn run(
    kind: RevokerKind,
    trace: &str,
    level: LogLevel,
) -> (Result<sweeprev_core::ReplaySummary, RunError>, SharedBuf, SharedBuf) {
    let table = SharedBuf::default();
    let logs = SharedBuf::default();
    let mut replay = Replay::new(ReplayConfig::new(kind)).unwrap();
    replay.attach_graph_output(table.clone()).unwrap();
    let mut log = LogEmitter::to_writer(Box::new(logs.clone()), "test", level);
    let result = run_trace(&mut replay, Cursor::new(trace.to_string()), &mut log);
    (result, table, logs)
}

#[test]
fn naive_replay_writes_table_and_summary() {
    let (result, table, _) = run(RevokerKind::Naive, REUSE_TRACE, LogLevel::Error);
    let summary = result.unwrap();

    assert_eq!(summary.events, 4);
    assert_eq!(summary.swept, 16);
    assert_eq!(summary.sweep_count, 1);
    assert_eq!(summary.duration_ns, 2_000_000);
    assert_eq!(summary.allocator.allocated_size, 16);
    assert_eq!(
        table.lines(),
        vec![
            "#timestamp\taddr-space-total\taddr-space-sweep\tallocator-mapped\tallocator-allocd\tallocator-swept",
            "0\t0\t0\t0\t64\t0",
            "2000000\t0\t0\t0\t16\t16",
        ]
    );
}

#[test]
fn compacting_replay_also_sweeps_unrelated_freed_memory() {
    let (result, _, _) = run(RevokerKind::Compacting, REUSE_TRACE, LogLevel::Error);
    let summary = result.unwrap();
    // The whole freed chunk plus the synthesized byte at 0x5000.
    assert_eq!(summary.swept, 65);
    assert_eq!(summary.sweep_count, 1);
}

#[test]
fn warnings_are_forwarded_above_threshold() {
    let (result, _, logs) = run(RevokerKind::Naive, REUSE_TRACE, LogLevel::Warn);
    result.unwrap();
    let lines = logs.lines();
    assert_eq!(lines.len(), 1, "{lines:?}");

    let entry = validate_log_line(&lines[0], 1).unwrap();
    assert_eq!(entry.level, LogLevel::Warn);
    assert_eq!(entry.event, "free_unknown_address");
    assert_eq!(entry.begin.as_deref(), Some("0x5000"));
    assert_eq!(entry.run_id.as_deref(), Some("test"));
    assert_eq!(entry.trace_timestamp_ns, Some(0));
}

#[test]
fn info_threshold_brackets_the_run() {
    let (result, _, logs) = run(RevokerKind::Naive, REUSE_TRACE, LogLevel::Info);
    result.unwrap();
    let events: Vec<String> = logs
        .lines()
        .iter()
        .enumerate()
        .map(|(i, line)| validate_log_line(line, i + 1).unwrap().event)
        .collect();
    assert_eq!(
        events,
        vec!["replay_start", "free_unknown_address", "replay_complete"]
    );
}

#[test]
fn fatal_threshold_silences_recoverable_warnings() {
    let (result, _, logs) = run(RevokerKind::Naive, REUSE_TRACE, LogLevel::Fatal);
    result.unwrap();
    assert!(logs.text().is_empty());
}

#[test]
fn revoking_live_memory_aborts_with_fatal_entry() {
    let trace = r#"{"timestamp_ns":0,"event":"allocated","begin":4096,"end":4160}
{"timestamp_ns":1,"event":"revoked","ranges":[[4096,4112]]}
{"timestamp_ns":2,"event":"freed","begin":4096}
"#;
    let (result, table, logs) = run(RevokerKind::Naive, trace, LogLevel::Fatal);
    let err = result.unwrap_err();
    assert!(matches!(
        err,
        RunError::Replay(ReplayError::RevokeAllocated { timestamp_ns: 1, .. })
    ));

    let lines = logs.lines();
    assert_eq!(lines.len(), 1);
    let entry = validate_log_line(&lines[0], 1).unwrap();
    assert_eq!(entry.level, LogLevel::Fatal);
    assert_eq!(entry.event, "replay_aborted");
    let details = entry.details.unwrap();
    assert_eq!(details["events"], 1);
    assert!(
        details["error"]
            .as_str()
            .unwrap()
            .contains("revoking address intervals that are still allocated")
    );
    // Only the first snapshot made it out; no forced final emission.
    assert_eq!(table.lines().len(), 2);
}

#[test]
fn aborted_run_flushes_buffered_outputs() {
    let trace = r#"{"timestamp_ns":0,"event":"allocated","begin":4096,"end":4160}
{"timestamp_ns":1,"event":"revoked","ranges":[[4096,4112]]}
"#;
    let table = SharedBuf::default();
    let mut replay = Replay::new(ReplayConfig::new(RevokerKind::Naive)).unwrap();
    replay
        .attach_graph_output(BufWriter::with_capacity(1 << 16, table.clone()))
        .unwrap();
    let mut log = LogEmitter::to_writer(Box::new(SharedBuf::default()), "test", LogLevel::Fatal);

    let result = run_trace(&mut replay, Cursor::new(trace.to_string()), &mut log);
    assert!(result.is_err());

    // The replay still owns the writer; rows must already be visible.
    assert_eq!(
        table.lines(),
        vec![
            "#timestamp\taddr-space-total\taddr-space-sweep\tallocator-mapped\tallocator-allocd\tallocator-swept",
            "0\t0\t0\t0\t64\t0",
        ]
    );
}

#[test]
fn malformed_line_aborts_with_line_number() {
    let trace = r#"{"timestamp_ns":0,"event":"size_measured","bytes":4096}
{"timestamp_ns":1,"event":"allocated","begin":"oops"}
"#;
    let (result, _, logs) = run(RevokerKind::Accounting, trace, LogLevel::Error);
    assert!(matches!(result, Err(RunError::Parse { line: 2, .. })));
    assert!(logs.text().contains("\"replay_aborted\""));
}

#[test]
fn recorded_revocations_charge_accounting_replay() {
    let trace = r#"{"timestamp_ns":0,"event":"allocated","begin":0,"end":100}
{"timestamp_ns":1,"event":"freed","begin":0}
{"timestamp_ns":2,"event":"revoked","ranges":[[0,100],[200,232]]}
"#;
    let (result, _, _) = run(RevokerKind::Accounting, trace, LogLevel::Error);
    let summary = result.unwrap();
    assert_eq!(summary.swept, 132);
    assert_eq!(summary.sweep_count, 1);
    assert_eq!(summary.allocator.allocated_size, 0);
}
