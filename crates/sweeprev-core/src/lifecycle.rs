//! Structured lifecycle records for repaired trace anomalies.
//!
//! Models never print. They append [`ModelLogRecord`]s which the embedding
//! harness drains and forwards to its log sink.

use serde::Serialize;

use crate::trace::Timestamp;

/// Model lifecycle log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelLogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured model lifecycle record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelLogRecord {
    /// Monotonic decision/event id.
    pub decision_id: u64,
    /// Correlation id for this record.
    pub trace_id: String,
    /// Trace time of the event being processed.
    pub timestamp_ns: u64,
    pub level: ModelLogLevel,
    /// Trace operation (`allocated`, `freed`, `reallocated`, ...).
    pub symbol: &'static str,
    /// Event kind (`misfree`, `overlapping_allocation_chopped`, ...).
    pub event: &'static str,
    pub begin: Option<u64>,
    pub end: Option<u64>,
    /// Machine-readable repair label.
    pub outcome: &'static str,
    pub details: String,
}

/// Append-only record buffer with decision-id allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleLog {
    component: &'static str,
    next_decision_id: u64,
    records: Vec<ModelLogRecord>,
}

/// Fields of a record that vary per call site.
#[derive(Debug, Clone, Copy)]
pub struct LogSite {
    pub level: ModelLogLevel,
    pub symbol: &'static str,
    pub event: &'static str,
    pub outcome: &'static str,
}

impl LifecycleLog {
    #[must_use]
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            next_decision_id: 1,
            records: Vec::new(),
        }
    }

    pub fn record(
        &mut self,
        timestamp: Timestamp,
        site: LogSite,
        begin: Option<u64>,
        end: Option<u64>,
        details: impl Into<String>,
    ) {
        let decision_id = self.next_decision_id;
        self.next_decision_id = self.next_decision_id.wrapping_add(1);
        self.records.push(ModelLogRecord {
            decision_id,
            trace_id: format!("{}::{}::{:016x}", self.component, site.symbol, decision_id),
            timestamp_ns: timestamp.as_ns(),
            level: site.level,
            symbol: site.symbol,
            event: site.event,
            begin,
            end,
            outcome: site.outcome,
            details: details.into(),
        });
    }

    #[must_use]
    pub fn records(&self) -> &[ModelLogRecord] {
        &self.records
    }

    pub fn drain(&mut self) -> Vec<ModelLogRecord> {
        std::mem::take(&mut self.records)
    }
}
