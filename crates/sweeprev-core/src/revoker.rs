//! Sweeping revocation engine.
//!
//! A [`SweepingRevoker`] subscribes to reuse notifications from the
//! allocator model. On each one its [`SweepStrategy`] picks the batch of
//! freed memory to sweep; the revoker checks the batch against the sweep
//! ceiling, charges the freed bytes inside it to the cumulative swept
//! counter and marks the batch Revoked in the allocator state. Revoked
//! memory absorbed into a batch was charged when it was first swept.

use crate::error::ReplayError;
use crate::interval::{AddressInterval, IntervalState};
use crate::model::{AllocatorState, ReuseSubscriber};
use crate::trace::Timestamp;

/// Decides which freed memory one reuse notification sweeps.
pub trait SweepStrategy {
    fn name(&self) -> &'static str;

    /// The ordered batch to revoke for a reuse of `[begin, end)`.
    ///
    /// `state` still shows the memory as freed.
    fn batch(&self, state: &AllocatorState, begin: u64, end: u64) -> Vec<AddressInterval>;
}

/// Sweeps only the freed fragments inside the reused range.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveStrategy;

impl SweepStrategy for NaiveStrategy {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn batch(&self, state: &AllocatorState, begin: u64, end: u64) -> Vec<AddressInterval> {
        state
            .intervals_in(begin, end)
            .into_iter()
            .filter(|ival| ival.has_state(IntervalState::Freed))
            .filter_map(|ival| ival.clipped(begin, end))
            .collect()
    }
}

/// Sweeps every freed interval in the address space at once, merged across
/// touching freed and revoked neighbours.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactingStrategy;

impl SweepStrategy for CompactingStrategy {
    fn name(&self) -> &'static str {
        "compacting"
    }

    fn batch(&self, state: &AllocatorState, _begin: u64, _end: u64) -> Vec<AddressInterval> {
        let freed = state.intervals_with_state(IntervalState::Freed);
        let mut merged: Vec<AddressInterval> = Vec::new();
        for ival in freed {
            if merged.last().is_some_and(|last| ival.begin < last.end) {
                continue;
            }
            match state.coalesced_around(ival.begin, &[IntervalState::Revoked]) {
                Some(run) => merged.push(run),
                None => merged.push(ival),
            }
        }
        merged
    }
}

/// One recorded sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepRecord {
    pub timestamp_ns: u64,
    pub bytes: u64,
    pub intervals: usize,
}

/// Cumulative sweep accounting around an optional strategy.
///
/// Without a strategy the revoker ignores reuse and only charges
/// revocations recorded in the trace itself.
pub struct SweepingRevoker {
    strategy: Option<Box<dyn SweepStrategy>>,
    capacity: usize,
    swept: u64,
    sweeps: Vec<SweepRecord>,
}

impl SweepingRevoker {
    #[must_use]
    pub fn new(strategy: Box<dyn SweepStrategy>, capacity: usize) -> Self {
        Self {
            strategy: Some(strategy),
            capacity,
            swept: 0,
            sweeps: Vec::new(),
        }
    }

    /// A revoker that only accounts trace-recorded revocations.
    #[must_use]
    pub fn passive(capacity: usize) -> Self {
        Self {
            strategy: None,
            capacity,
            swept: 0,
            sweeps: Vec::new(),
        }
    }

    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        self.strategy.as_ref().map_or("none", |s| s.name())
    }

    /// Cumulative swept bytes.
    #[must_use]
    pub fn swept(&self) -> u64 {
        self.swept
    }

    #[must_use]
    pub fn swept_mb(&self) -> u64 {
        self.swept >> 20
    }

    #[must_use]
    pub fn swept_gb(&self) -> u64 {
        self.swept >> 30
    }

    #[must_use]
    pub fn sweeps(&self) -> &[SweepRecord] {
        &self.sweeps
    }

    #[must_use]
    pub fn sweep_count(&self) -> usize {
        self.sweeps.len()
    }

    /// Charge `bytes` for a batch. Fails before touching any counter if the
    /// batch holds more intervals than the ceiling allows.
    fn sweep(
        &mut self,
        now: Timestamp,
        batch: &[AddressInterval],
        bytes: u64,
    ) -> Result<(), ReplayError> {
        if batch.len() > self.capacity {
            return Err(ReplayError::SweepCapacityExceeded {
                timestamp_ns: now.as_ns(),
                count: batch.len(),
                capacity: self.capacity,
                intervals: batch.to_vec(),
            });
        }
        self.swept = self.swept.saturating_add(bytes);
        self.sweeps.push(SweepRecord {
            timestamp_ns: now.as_ns(),
            bytes,
            intervals: batch.len(),
        });
        Ok(())
    }

    /// Charge revocations the trace itself recorded.
    pub fn revoked(&mut self, now: Timestamp, ranges: &[(u64, u64)]) -> Result<(), ReplayError> {
        let batch: Vec<AddressInterval> = ranges
            .iter()
            .filter_map(|&(b, e)| AddressInterval::checked(b, e, Some(IntervalState::Freed)))
            .collect();
        if batch.is_empty() {
            return Ok(());
        }
        let bytes = batch.iter().map(AddressInterval::len).sum();
        self.sweep(now, &batch, bytes)
    }
}

impl ReuseSubscriber for SweepingRevoker {
    fn reused(
        &mut self,
        state: &mut AllocatorState,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        let Some(strategy) = self.strategy.as_ref() else {
            return Ok(());
        };
        let batch = strategy.batch(state, begin, end);
        if batch.is_empty() {
            return Ok(());
        }
        let bytes = batch
            .iter()
            .map(|ival| state.freed_bytes_in(ival.begin, ival.end))
            .sum();
        self.sweep(state.now(), &batch, bytes)?;
        let ranges: Vec<(u64, u64)> = batch.iter().map(|ival| (ival.begin, ival.end)).collect();
        state.revoke(&ranges)
    }
}
