//! Address-space models.
//!
//! Every model implements [`AddrSpaceModel`], the single capability
//! interface the replay dispatcher drives. Implementations are picked at
//! startup:
//! - [`AllocatorAddrSpaceModel`]: full allocation lifecycle state machine
//!   with reuse notifications.
//! - [`MappingAddrSpaceModel`]: mapped/unmapped footprint only.
//! - [`AccountingAddrSpaceModel`]: byte totals only, no intervals.

pub mod accounting;
pub mod allocator;
pub mod mapping;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use sha2::{Digest, Sha256};

use crate::error::ReplayError;
use crate::interval::AddressInterval;
use crate::lifecycle::ModelLogRecord;
use crate::trace::Timestamp;

pub use accounting::AccountingAddrSpaceModel;
pub use allocator::{AllocatorAddrSpaceModel, AllocatorState};
pub use mapping::MappingAddrSpaceModel;

/// Running byte totals of a model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Aggregates {
    /// Last sampled total address-space size.
    pub size: u64,
    /// Last sampled sweepable address-space size.
    pub sweep_size: u64,
    /// Bytes currently mapped (by the allocator, for allocator models).
    pub mapped_size: u64,
    /// Bytes currently allocated.
    pub allocated_size: u64,
}

impl Aggregates {
    #[must_use]
    pub const fn size_kb(&self) -> u64 {
        self.size >> 10
    }

    #[must_use]
    pub const fn size_mb(&self) -> u64 {
        self.size >> 20
    }

    #[must_use]
    pub const fn sweep_size_kb(&self) -> u64 {
        self.sweep_size >> 10
    }

    #[must_use]
    pub const fn sweep_size_mb(&self) -> u64 {
        self.sweep_size >> 20
    }

    #[must_use]
    pub const fn mapped_size_kb(&self) -> u64 {
        self.mapped_size >> 10
    }

    #[must_use]
    pub const fn mapped_size_mb(&self) -> u64 {
        self.mapped_size >> 20
    }
}

/// Receives "reused" notifications from [`AllocatorAddrSpaceModel`].
///
/// Called before the reusing allocation is committed: `state` still shows
/// the freed memory at `[begin, end)`.
pub trait ReuseSubscriber {
    fn reused(
        &mut self,
        state: &mut AllocatorState,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError>;
}

/// Subscriber handle shared between a model and whoever reads its results.
pub type SharedSubscriber = Rc<RefCell<dyn ReuseSubscriber>>;

/// SHA-256 over a model's aggregates and interval sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StateDigest(pub [u8; 32]);

impl StateDigest {
    pub(crate) fn compute<'a>(
        aggregates: Aggregates,
        interval_sets: impl IntoIterator<Item = &'a [AddressInterval]>,
    ) -> Self {
        let mut hasher = Sha256::new();
        for total in [
            aggregates.size,
            aggregates.sweep_size,
            aggregates.mapped_size,
            aggregates.allocated_size,
        ] {
            hasher.update(total.to_le_bytes());
        }
        for set in interval_sets {
            hasher.update((set.len() as u64).to_le_bytes());
            for ival in set {
                hasher.update(ival.begin.to_le_bytes());
                hasher.update(ival.end.to_le_bytes());
                let tag = ival.state.map_or(0u8, |s| s.index() as u8 + 1);
                hasher.update([tag]);
            }
        }
        Self(hasher.finalize().into())
    }
}

impl fmt::Display for StateDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Capability interface shared by all address-space models.
///
/// Event handlers default to no-ops so passive models only implement the
/// events they track.
pub trait AddrSpaceModel {
    /// Short model name for diagnostics.
    fn name(&self) -> &'static str;

    fn aggregates(&self) -> Aggregates;

    fn allocated(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        _begin: u64,
        _end: u64,
    ) -> Result<(), ReplayError> {
        Ok(())
    }

    fn reallocated(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        _old_begin: u64,
        _new_begin: u64,
        _new_end: u64,
    ) -> Result<(), ReplayError> {
        Ok(())
    }

    fn freed(&mut self, _now: Timestamp, _stack: &str, _begin: u64) -> Result<(), ReplayError> {
        Ok(())
    }

    fn revoked(&mut self, _now: Timestamp, _ranges: &[(u64, u64)]) -> Result<(), ReplayError> {
        Ok(())
    }

    fn mapped(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        _begin: u64,
        _end: u64,
    ) -> Result<(), ReplayError> {
        Ok(())
    }

    fn unmapped(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        _begin: u64,
        _end: u64,
    ) -> Result<(), ReplayError> {
        Ok(())
    }

    fn size_measured(&mut self, _bytes: u64) {}

    fn sweep_size_measured(&mut self, _bytes: u64) {}

    /// Coalesced intervals with explicit state, in address order.
    fn coalesced_intervals(&self) -> Vec<AddressInterval> {
        Vec::new()
    }

    /// Coalesced intervals with explicit state overlapping `[begin, end)`,
    /// clipped to it.
    fn coalesced_intervals_in(&self, _begin: u64, _end: u64) -> Vec<AddressInterval> {
        Vec::new()
    }

    /// Register a reuse subscriber. Only interval-tracking allocator models
    /// publish reuse.
    fn subscribe(&mut self, _subscriber: SharedSubscriber) -> Result<(), ReplayError> {
        Err(ReplayError::UnsupportedOutput("reuse subscription"))
    }

    fn drain_lifecycle_logs(&mut self) -> Vec<ModelLogRecord> {
        Vec::new()
    }

    fn state_digest(&self) -> StateDigest {
        StateDigest::compute(
            self.aggregates(),
            std::iter::empty::<&[AddressInterval]>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interval::IntervalState;

    #[test]
    fn size_accessors_shift() {
        let agg = Aggregates {
            size: 3 << 20,
            sweep_size: 5 << 10,
            mapped_size: 7 << 20,
            allocated_size: 0,
        };
        assert_eq!(agg.size_mb(), 3);
        assert_eq!(agg.size_kb(), 3 << 10);
        assert_eq!(agg.sweep_size_kb(), 5);
        assert_eq!(agg.sweep_size_mb(), 0);
        assert_eq!(agg.mapped_size_mb(), 7);
    }

    #[test]
    fn digest_depends_on_intervals() {
        let agg = Aggregates::default();
        let a = [AddressInterval::with_state(0, 8, IntervalState::Freed)];
        let b = [AddressInterval::with_state(0, 8, IntervalState::Revoked)];
        let da = StateDigest::compute(agg, [&a[..]]);
        let db = StateDigest::compute(agg, [&b[..]]);
        assert_ne!(da, db);
        assert_eq!(da, StateDigest::compute(agg, [&a[..]]));
        assert_eq!(da.to_string().len(), 64);
    }
}
