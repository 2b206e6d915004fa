//! Integration test: structured logging contract
//!
//! Validates that:
//! 1. LogEmitter writes valid JSONL to files.
//! 2. validate_log_file counts lines and reports violations with line numbers.
//! 3. Model lifecycle records survive the conversion to log entries.
//!
//! Run: cargo test -p sweeprev-harness --test structured_log_test

use std::path::PathBuf;

use sweeprev_core::{ModelLogLevel, ModelLogRecord};
use sweeprev_harness::structured_log::{
    LogEmitter, LogEntry, LogLevel, validate_log_file, validate_log_line,
};

fn scratch_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("sweeprev-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

#[test]
fn emitter_writes_valid_jsonl_file() {
    let path = scratch_path("emitter.jsonl");
    {
        let mut emitter = LogEmitter::to_file(&path, "file-run", LogLevel::Trace).unwrap();
        emitter.emit(LogLevel::Info, "replay_start").unwrap();
        emitter
            .emit_entry(
                LogEntry::new("", LogLevel::Warn, "misfree")
                    .with_symbol("freed")
                    .with_range(0x1000, 0x1040)
                    .with_outcome("freed_covering_interval"),
            )
            .unwrap();
        emitter.emit(LogLevel::Fatal, "replay_aborted").unwrap();
        emitter.flush().unwrap();
    }

    let (count, errors) = validate_log_file(&path).unwrap();
    assert_eq!(count, 3);
    assert!(errors.is_empty(), "{errors:?}");

    let content = std::fs::read_to_string(&path).unwrap();
    let entries: Vec<LogEntry> = content
        .lines()
        .enumerate()
        .map(|(i, line)| validate_log_line(line, i + 1).unwrap())
        .collect();
    assert_eq!(entries[0].trace_id, "sweeprev::file-run::001");
    assert_eq!(entries[1].trace_id, "sweeprev::file-run::002");
    assert_eq!(entries[1].begin.as_deref(), Some("0x1000"));
    assert_eq!(entries[1].end.as_deref(), Some("0x1040"));
    assert_eq!(entries[2].level, LogLevel::Fatal);
    assert!(entries.iter().all(|e| e.run_id.as_deref() == Some("file-run")));

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn validate_file_reports_line_numbers() {
    let path = scratch_path("invalid.jsonl");
    let good = LogEntry::new("sweeprev::r::001", LogLevel::Info, "ok")
        .to_jsonl()
        .unwrap();
    let bad_level = r#"{"timestamp":"t","trace_id":"a::b","level":"loud","event":"x"}"#;
    let missing_event = r#"{"timestamp":"t","trace_id":"a::b","level":"info"}"#;
    std::fs::write(&path, format!("{good}\n\n{bad_level}\n{missing_event}\n")).unwrap();

    let (count, errors) = validate_log_file(&path).unwrap();
    assert_eq!(count, 3);
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].line_number, 3);
    assert_eq!(errors[0].field, "level");
    assert_eq!(errors[1].line_number, 4);
    assert_eq!(errors[1].field, "event");
    assert_eq!(
        errors[1].to_string(),
        "line 4: field 'event': required field missing"
    );

    std::fs::remove_file(&path).unwrap();
}

#[test]
fn lifecycle_record_keeps_its_correlation_fields() {
    let record = ModelLogRecord {
        decision_id: 9,
        trace_id: "model::allocator::reallocated::0000000000000009".to_string(),
        timestamp_ns: 1_500,
        level: ModelLogLevel::Error,
        symbol: "reallocated",
        event: "realloc_non_allocated",
        begin: Some(0x2000),
        end: Some(0x2100),
        outcome: "assumed_allocated",
        details: String::new(),
    };
    let entry = LogEntry::from_model_record(&record);
    let line = entry.to_jsonl().unwrap();
    let parsed = validate_log_line(&line, 1).unwrap();

    assert_eq!(parsed.trace_id, record.trace_id);
    assert_eq!(parsed.level, LogLevel::Error);
    assert_eq!(parsed.symbol.as_deref(), Some("reallocated"));
    assert_eq!(parsed.outcome.as_deref(), Some("assumed_allocated"));
    assert_eq!(parsed.end.as_deref(), Some("0x2100"));
    assert!(parsed.details.is_none());
}
