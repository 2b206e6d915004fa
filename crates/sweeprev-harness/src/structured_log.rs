//! Structured logging for sweeprev replays.
//!
//! Provides:
//! - [`LogEntry`]: canonical JSONL log record with required + optional fields.
//! - [`LogEmitter`]: writes JSONL lines at or above a level threshold.
//! - [`validate_log_line`]: validates a single JSONL line against the schema.
//! - [`validate_log_file`]: validates an entire JSONL file.
//!
//! Model lifecycle records ([`ModelLogRecord`]) convert into entries with
//! [`LogEntry::from_model_record`].

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

use sweeprev_core::{ModelLogLevel, ModelLogRecord};

// ---------------------------------------------------------------------------
// Log entry
// ---------------------------------------------------------------------------

/// Severity level for log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    /// Replay-aborting diagnostics.
    Fatal,
}

impl LogLevel {
    const NAMES: [&'static str; 6] = ["trace", "debug", "info", "warn", "error", "fatal"];

    /// Parse a level name (case-insensitive). `warning` and `critical` are
    /// accepted as aliases of `warn` and `fatal`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            "fatal" | "critical" => Some(Self::Fatal),
            _ => None,
        }
    }
}

impl From<ModelLogLevel> for LogLevel {
    fn from(level: ModelLogLevel) -> Self {
        match level {
            ModelLogLevel::Trace => Self::Trace,
            ModelLogLevel::Debug => Self::Debug,
            ModelLogLevel::Info => Self::Info,
            ModelLogLevel::Warn => Self::Warn,
            ModelLogLevel::Error => Self::Error,
        }
    }
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    // Required
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    // Optional
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    /// Revoker the replay runs with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revoker: Option<String>,
    /// Trace operation (`allocated`, `freed`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Trace time of the offending event.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_timestamp_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_id: Option<u64>,
    /// Hex address, `0x`-prefixed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begin: Option<String>,
    /// Hex address, `0x`-prefixed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    /// Repair applied (`synthesized_one_byte_interval`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn hex(addr: u64) -> String {
    format!("{addr:#x}")
}

impl LogEntry {
    /// Create a new log entry with required fields only.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            run_id: None,
            revoker: None,
            symbol: None,
            trace_timestamp_ns: None,
            decision_id: None,
            begin: None,
            end: None,
            outcome: None,
            duration_ms: None,
            details: None,
        }
    }

    /// Convert a drained model lifecycle record.
    #[must_use]
    pub fn from_model_record(record: &ModelLogRecord) -> Self {
        let mut entry = Self::new(record.trace_id.clone(), record.level.into(), record.event)
            .with_symbol(record.symbol)
            .with_trace_timestamp(record.timestamp_ns)
            .with_decision_id(record.decision_id)
            .with_outcome(record.outcome);
        entry.begin = record.begin.map(hex);
        entry.end = record.end.map(hex);
        if !record.details.is_empty() {
            entry = entry.with_details(serde_json::json!({ "message": record.details }));
        }
        entry
    }

    #[must_use]
    pub fn with_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    #[must_use]
    pub fn with_revoker(mut self, revoker: impl Into<String>) -> Self {
        self.revoker = Some(revoker.into());
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_trace_timestamp(mut self, ns: u64) -> Self {
        self.trace_timestamp_ns = Some(ns);
        self
    }

    #[must_use]
    pub fn with_decision_id(mut self, id: u64) -> Self {
        self.decision_id = Some(id);
        self
    }

    #[must_use]
    pub fn with_range(mut self, begin: u64, end: u64) -> Self {
        self.begin = Some(hex(begin));
        self.end = Some(hex(end));
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Log emitter
// ---------------------------------------------------------------------------

/// Writes structured JSONL log entries at or above a threshold level.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    threshold: LogLevel,
    seq: u64,
    run_id: String,
    written: u64,
}

impl LogEmitter {
    /// Create an emitter that writes to a file.
    pub fn to_file(path: &Path, run_id: &str, threshold: LogLevel) -> std::io::Result<Self> {
        let file = std::fs::File::create(path)?;
        Ok(Self::to_writer(
            Box::new(std::io::BufWriter::new(file)),
            run_id,
            threshold,
        ))
    }

    /// Create an emitter over any writer (stderr, a test buffer, ...).
    #[must_use]
    pub fn to_writer(writer: Box<dyn Write>, run_id: &str, threshold: LogLevel) -> Self {
        Self {
            writer,
            threshold,
            seq: 0,
            run_id: run_id.to_string(),
            written: 0,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> LogLevel {
        self.threshold
    }

    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.threshold
    }

    /// Lines written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Generate the next trace ID.
    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("sweeprev::{}::{:03}", self.run_id, self.seq)
    }

    /// Emit a log entry with auto-generated trace_id and run_id.
    ///
    /// Returns `None` when the level is below the threshold.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> std::io::Result<Option<LogEntry>> {
        if !self.enabled(level) {
            return Ok(None);
        }
        let trace_id = self.next_trace_id();
        let entry = LogEntry::new(trace_id, level, event).with_run(&self.run_id);
        self.write_entry(&entry)?;
        Ok(Some(entry))
    }

    /// Emit a fully-populated log entry. Returns whether it was written.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> std::io::Result<bool> {
        if !self.enabled(entry.level) {
            return Ok(false);
        }
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.run_id.is_none() {
            entry.run_id = Some(self.run_id.clone());
        }
        self.write_entry(&entry)?;
        Ok(true)
    }

    fn write_entry(&mut self, entry: &LogEntry) -> std::io::Result<()> {
        let line = entry.to_jsonl().map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.written += 1;
        Ok(())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validation error for a log line.
#[derive(Debug)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

/// Validate a single JSONL line against the schema.
///
/// Returns the parsed entry, or every validation error found.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let mut errors = Vec::new();
    let error = |field: &str, message: String| LogValidationError {
        line_number,
        field: field.to_string(),
        message,
    };

    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return Err(vec![error("<json>", format!("invalid JSON: {e}"))]),
    };
    let Some(obj) = value.as_object() else {
        return Err(vec![error("<root>", "expected JSON object".to_string())]);
    };

    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(error(field, "required field missing".to_string()));
        }
    }

    if let Some(level) = obj.get("level").and_then(|v| v.as_str())
        && !LogLevel::NAMES.contains(&level)
    {
        errors.push(error("level", format!("invalid level: '{level}'")));
    }

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && !trace_id.contains("::")
    {
        errors.push(error(
            "trace_id",
            format!("trace_id should follow <component>::<scope>::<seq> format, got: '{trace_id}'"),
        ));
    }

    // Addresses are 0x-prefixed hex strings.
    for field in ["begin", "end"] {
        if let Some(addr) = obj.get(field) {
            let valid = addr
                .as_str()
                .and_then(|s| s.strip_prefix("0x"))
                .is_some_and(|digits| u64::from_str_radix(digits, 16).is_ok());
            if !valid {
                errors.push(error(field, format!("expected 0x-prefixed hex address, got {addr}")));
            }
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value)
        .map_err(|e| vec![error("<deserialization>", format!("failed to deserialize: {e}"))])
}

/// Validate an entire JSONL file.
///
/// Returns the total line count and any validation errors found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn now_utc() -> String {
    // Calendar fields are approximate; ordering and rough wall time is all
    // the logs need.
    let duration = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = duration.as_secs();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}Z",
        1970 + secs / 31_557_600,
        (secs % 31_557_600) / 2_629_800 + 1,
        (secs % 2_629_800) / 86400 + 1,
        (secs % 86400) / 3600,
        (secs % 3600) / 60,
        secs % 60,
        duration.subsec_millis(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_entry_serializes_required_fields() {
        let entry = LogEntry::new("sweeprev::run-1::001", LogLevel::Info, "replay_start");
        let json = entry.to_jsonl().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed["timestamp"].is_string());
        assert_eq!(parsed["trace_id"], "sweeprev::run-1::001");
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["event"], "replay_start");
        assert!(parsed.get("run_id").is_none());
        assert!(parsed.get("begin").is_none());
    }

    #[test]
    fn model_record_converts_with_hex_addresses() {
        let record = ModelLogRecord {
            decision_id: 3,
            trace_id: "model::allocator::freed::0000000000000003".to_string(),
            timestamp_ns: 77,
            level: ModelLogLevel::Warn,
            symbol: "freed",
            event: "misfree",
            begin: Some(0x1000),
            end: None,
            outcome: "freed_covering_interval",
            details: "freed(1000) misfrees AddrIval(800, 1800, Allocated)".to_string(),
        };
        let entry = LogEntry::from_model_record(&record);
        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.event, "misfree");
        assert_eq!(entry.begin.as_deref(), Some("0x1000"));
        assert!(entry.end.is_none());
        assert_eq!(entry.trace_timestamp_ns, Some(77));
        assert_eq!(entry.decision_id, Some(3));
        assert_eq!(
            entry.details.as_ref().and_then(|d| d["message"].as_str()),
            Some("freed(1000) misfrees AddrIval(800, 1800, Allocated)")
        );
        assert!(validate_log_line(&entry.to_jsonl().unwrap(), 1).is_ok());
    }

    #[test]
    fn level_parsing_and_order() {
        assert_eq!(LogLevel::from_str_loose("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str_loose("critical"), Some(LogLevel::Fatal));
        assert_eq!(LogLevel::from_str_loose("loud"), None);
        assert!(LogLevel::Fatal > LogLevel::Error);
        assert_eq!(LogLevel::from(ModelLogLevel::Error), LogLevel::Error);
    }

    #[test]
    fn validate_missing_required_field() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","level":"info","event":"test"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "trace_id"));
    }

    #[test]
    fn validate_invalid_level_and_address() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","trace_id":"a::b::c","level":"critical","event":"test","begin":"4096"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "level"));
        assert!(errors.iter().any(|e| e.field == "begin"));
    }

    #[test]
    fn validate_invalid_json() {
        let errors = validate_log_line("not json at all", 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "<json>"));
    }

    #[test]
    fn validate_bad_trace_id_format() {
        let json = r#"{"timestamp":"2026-01-01T00:00:00Z","trace_id":"no-separator","level":"info","event":"test"}"#;
        let errors = validate_log_line(json, 1).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "trace_id"));
    }

    #[test]
    fn emitter_filters_below_threshold() {
        let mut emitter = LogEmitter::to_writer(Box::new(Vec::new()), "run-42", LogLevel::Warn);
        assert!(emitter.emit(LogLevel::Info, "ignored").unwrap().is_none());
        let e1 = emitter.emit(LogLevel::Warn, "kept").unwrap().unwrap();
        let e2 = emitter.emit(LogLevel::Fatal, "kept").unwrap().unwrap();
        assert_eq!(e1.trace_id, "sweeprev::run-42::001");
        assert_eq!(e2.trace_id, "sweeprev::run-42::002");
        assert_eq!(emitter.written(), 2);

        let entry = LogEntry::new("", LogLevel::Debug, "quiet");
        assert!(!emitter.emit_entry(entry).unwrap());
    }

    #[test]
    fn roundtrip_deserialization() {
        let entry = LogEntry::new("sweeprev::run-1::001", LogLevel::Error, "realloc_non_allocated")
            .with_revoker("compacting")
            .with_range(0x10, 0x20)
            .with_duration_ms(5);
        let restored: LogEntry = serde_json::from_str(&entry.to_jsonl().unwrap()).unwrap();
        assert_eq!(restored, entry);
    }
}
