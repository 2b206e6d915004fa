//! Trace replay harness for sweeprev.
//!
//! This crate provides:
//! - Structured logging: JSONL log entries, threshold filtering, validation
//! - Trace runner: replay a JSONL stream of timed events through a [`Replay`]
//!
//! [`Replay`]: sweeprev_core::Replay

#![forbid(unsafe_code)]

pub mod runner;
pub mod structured_log;

pub use runner::{RunError, run_trace};
pub use structured_log::{LogEmitter, LogEntry, LogLevel};
