//! Typed trace events as delivered by a replay driver.

use serde::{Deserialize, Serialize};

/// Trace time in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    #[must_use]
    pub const fn from_ns(ns: u64) -> Self {
        Self(ns)
    }

    #[must_use]
    pub const fn from_ms(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    #[must_use]
    pub const fn as_ns(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn as_ms(self) -> u64 {
        self.0 / 1_000_000
    }
}

/// One allocator-trace event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    Allocated {
        #[serde(default)]
        stack: String,
        begin: u64,
        end: u64,
    },
    Reallocated {
        #[serde(default)]
        stack: String,
        old_begin: u64,
        new_begin: u64,
        new_end: u64,
    },
    Freed {
        #[serde(default)]
        stack: String,
        begin: u64,
    },
    Revoked {
        ranges: Vec<(u64, u64)>,
    },
    Mapped {
        #[serde(default)]
        stack: String,
        begin: u64,
        end: u64,
    },
    Unmapped {
        #[serde(default)]
        stack: String,
        begin: u64,
        end: u64,
    },
    SizeMeasured {
        bytes: u64,
    },
    SweepSizeMeasured {
        bytes: u64,
    },
}

/// An event stamped with its trace time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub timestamp_ns: u64,
    #[serde(flatten)]
    pub event: TraceEvent,
}

impl TimedEvent {
    #[must_use]
    pub fn new(timestamp_ns: u64, event: TraceEvent) -> Self {
        Self {
            timestamp_ns,
            event,
        }
    }

    #[must_use]
    pub fn timestamp(&self) -> Timestamp {
        Timestamp(self.timestamp_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ms_truncates() {
        assert_eq!(Timestamp::from_ns(1_999_999).as_ms(), 1);
        assert_eq!(Timestamp::from_ms(250).as_ns(), 250_000_000);
    }

    #[test]
    fn timed_event_json_shape() {
        let line = r#"{"timestamp_ns":7,"event":"freed","stack":"free <- main","begin":4096}"#;
        let ev: TimedEvent = serde_json::from_str(line).unwrap();
        assert_eq!(
            ev,
            TimedEvent::new(
                7,
                TraceEvent::Freed {
                    stack: "free <- main".to_string(),
                    begin: 4096
                }
            )
        );

        let revoked = r#"{"timestamp_ns":9,"event":"revoked","ranges":[[0,16],[32,48]]}"#;
        let ev: TimedEvent = serde_json::from_str(revoked).unwrap();
        assert_eq!(
            ev.event,
            TraceEvent::Revoked {
                ranges: vec![(0, 16), (32, 48)]
            }
        );
    }

    #[test]
    fn stack_defaults_to_empty() {
        let line = r#"{"timestamp_ns":1,"event":"allocated","begin":0,"end":8}"#;
        let ev: TimedEvent = serde_json::from_str(line).unwrap();
        assert!(matches!(ev.event, TraceEvent::Allocated { ref stack, .. } if stack.is_empty()));
    }
}
