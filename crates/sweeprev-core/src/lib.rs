//! # sweeprev-core
//!
//! Replays allocator traces into an interval model of the address space and
//! measures what sweeping revocation would cost under different strategies.
//!
//! Nothing here allocates on behalf of the traced program: models only
//! record observed behaviour. Event flow is single-threaded and synchronous;
//! reuse notifications reach subscribers before the reusing allocation is
//! committed.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod interval;
pub mod interval_map;
pub mod lifecycle;
pub mod model;
pub mod output;
pub mod replay;
pub mod revoker;
pub mod trace;
pub mod tracked;

pub use config::{ReplayConfig, RevokerKind};
pub use error::{ConfigError, ReplayError};
pub use interval::{AddressInterval, IntervalState};
pub use interval_map::CoalescedIntervalMap;
pub use lifecycle::{ModelLogLevel, ModelLogRecord};
pub use model::{AddrSpaceModel, Aggregates, StateDigest};
pub use replay::{Replay, ReplaySummary};
pub use revoker::{CompactingStrategy, NaiveStrategy, SweepStrategy, SweepingRevoker};
pub use trace::{TimedEvent, Timestamp, TraceEvent};
