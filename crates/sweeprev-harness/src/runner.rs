//! JSONL trace runner.
//!
//! Reads one [`TimedEvent`] per line, replays it and forwards the model's
//! lifecycle records to a [`LogEmitter`]. Blank lines and `#` comments are
//! skipped.

use std::io::BufRead;
use std::time::Instant;

use sweeprev_core::{Replay, ReplayError, ReplaySummary, TimedEvent};

use crate::structured_log::{LogEmitter, LogEntry, LogLevel};

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Replay(#[from] ReplayError),
    #[error("trace line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse one trace line. Returns `Ok(None)` for blank and comment lines.
pub fn parse_trace_line(line: &str, line_number: usize) -> Result<Option<TimedEvent>, RunError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|source| RunError::Parse {
            line: line_number,
            source,
        })
}

/// Replay every event from `input` and finish the replay.
///
/// A fatal error is logged as a `replay_aborted` entry before it is
/// returned. Lifecycle records drained up to that point are still written,
/// and outputs are flushed without a final emission.
pub fn run_trace<R: BufRead>(
    replay: &mut Replay,
    input: R,
    log: &mut LogEmitter,
) -> Result<ReplaySummary, RunError> {
    let revoker = replay.config().revoker.as_str();
    log.emit_entry(
        LogEntry::new("", LogLevel::Info, "replay_start")
            .with_revoker(revoker)
            .with_details(serde_json::json!({
                "sweep_capacity": replay.config().sweep_capacity,
                "emit_period_ms": replay.config().emit_period_ms,
            })),
    )?;

    let started = Instant::now();
    let result = replay_lines(replay, input, log)
        .and_then(|()| replay.finish().map_err(RunError::from));
    forward_lifecycle_logs(replay, log)?;

    match result {
        Ok(summary) => {
            log.emit_entry(
                LogEntry::new("", LogLevel::Info, "replay_complete")
                    .with_revoker(revoker)
                    .with_duration_ms(elapsed_ms(started))
                    .with_details(serde_json::json!({
                        "events": summary.events,
                        "swept": summary.swept,
                        "sweeps": summary.sweep_count,
                        "digest": summary.digest.to_string(),
                    })),
            )?;
            log.flush()?;
            Ok(summary)
        }
        Err(err) => {
            let mut details = serde_json::json!({
                "events": replay.events(),
                "error": err.to_string(),
            });
            if let Err(flush_err) = replay.flush() {
                details["flush_error"] = flush_err.to_string().into();
            }
            log.emit_entry(
                LogEntry::new("", LogLevel::Fatal, "replay_aborted")
                    .with_revoker(revoker)
                    .with_duration_ms(elapsed_ms(started))
                    .with_details(details),
            )?;
            log.flush()?;
            Err(err)
        }
    }
}

fn replay_lines<R: BufRead>(
    replay: &mut Replay,
    input: R,
    log: &mut LogEmitter,
) -> Result<(), RunError> {
    for (i, line) in input.lines().enumerate() {
        let line = line?;
        let Some(event) = parse_trace_line(&line, i + 1)? else {
            continue;
        };
        replay.dispatch(&event)?;
        forward_lifecycle_logs(replay, log)?;
    }
    Ok(())
}

fn forward_lifecycle_logs(replay: &mut Replay, log: &mut LogEmitter) -> std::io::Result<()> {
    for record in replay.drain_lifecycle_logs() {
        log.emit_entry(LogEntry::from_model_record(&record))?;
    }
    Ok(())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        assert!(parse_trace_line("", 1).unwrap().is_none());
        assert!(parse_trace_line("   # header", 2).unwrap().is_none());
        let event = parse_trace_line(
            r#"{"timestamp_ns":5,"event":"size_measured","bytes":4096}"#,
            3,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.timestamp_ns, 5);
    }

    #[test]
    fn malformed_line_reports_its_number() {
        let err = parse_trace_line(r#"{"timestamp_ns":5,"event":"exploded"}"#, 12).unwrap_err();
        assert!(matches!(err, RunError::Parse { line: 12, .. }));
        assert!(err.to_string().starts_with("trace line 12:"));
    }
}
