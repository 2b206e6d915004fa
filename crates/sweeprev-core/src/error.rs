//! Error types for replay.
//!
//! Recoverable trace anomalies never surface here; they are repaired and
//! recorded as lifecycle log records. Everything in [`ReplayError`] aborts
//! the replay.

use thiserror::Error;

use crate::interval::{AddressInterval, display_list};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(
        "{timestamp_ns}\trevoking address intervals that are still allocated {}",
        display_list(.intervals)
    )]
    RevokeAllocated {
        timestamp_ns: u64,
        intervals: Vec<AddressInterval>,
    },
    #[error(
        "{timestamp_ns}\tsweep of {count} intervals exceeds the limit for intervals at once ({capacity}): {}",
        display_list(.intervals)
    )]
    SweepCapacityExceeded {
        timestamp_ns: u64,
        count: usize,
        capacity: usize,
        intervals: Vec<AddressInterval>,
    },
    #[error("trace timestamp went backwards: {previous_ns} -> {current_ns}")]
    TimestampRegression { previous_ns: u64, current_ns: u64 },
    #[error("{0} requires an interval-tracking allocator model")]
    UnsupportedOutput(&'static str),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown revoker '{0}' (expected naive, compacting or account)")]
    UnknownRevoker(String),
    #[error("sweep capacity must be at least one interval")]
    ZeroSweepCapacity,
    #[error("chunks per pool must be at least one")]
    ZeroChunks,
    #[error("allocated fraction {0} is outside [0, 1]")]
    FractionOutOfRange(f64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::IntervalState;

    #[test]
    fn revoke_allocated_names_intervals_and_timestamp() {
        let err = ReplayError::RevokeAllocated {
            timestamp_ns: 42,
            intervals: vec![AddressInterval::with_state(
                0x10,
                0x20,
                IntervalState::Allocated,
            )],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("42\t"), "{msg}");
        assert!(msg.contains("AddrIval(10, 20, Allocated)"), "{msg}");
    }

    #[test]
    fn config_error_converts() {
        let err: ReplayError = ConfigError::ZeroChunks.into();
        assert!(matches!(err, ReplayError::Config(ConfigError::ZeroChunks)));
    }
}
