//! Mapped/unmapped footprint tracker.
//!
//! Samples the whole process address space: every mapping counts, whoever
//! made it. Allocation events are ignored.

use crate::error::ReplayError;
use crate::interval::{AddressInterval, IntervalState};
use crate::interval_map::CoalescedIntervalMap;
use crate::model::{AddrSpaceModel, Aggregates, StateDigest};
use crate::trace::Timestamp;

#[derive(Debug, Clone, Default)]
pub struct MappingAddrSpaceModel {
    map: CoalescedIntervalMap,
    totals: Aggregates,
}

impl MappingAddrSpaceModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&mut self, begin: u64, end: u64, state: IntervalState) {
        // Empty mappings carry no bytes; nothing to record.
        let Some(interval) = AddressInterval::checked(begin, end, Some(state)) else {
            return;
        };
        let delta = self.map.assign(interval);
        self.totals.mapped_size = delta.apply(IntervalState::Mapped, self.totals.mapped_size);
    }
}

impl AddrSpaceModel for MappingAddrSpaceModel {
    fn name(&self) -> &'static str {
        "mapping"
    }

    fn aggregates(&self) -> Aggregates {
        self.totals
    }

    fn mapped(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.update(begin, end, IntervalState::Mapped);
        Ok(())
    }

    fn unmapped(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.update(begin, end, IntervalState::Unmapped);
        Ok(())
    }

    fn size_measured(&mut self, bytes: u64) {
        self.totals.size = bytes;
    }

    fn sweep_size_measured(&mut self, bytes: u64) {
        self.totals.sweep_size = bytes;
    }

    fn coalesced_intervals(&self) -> Vec<AddressInterval> {
        self.map.iter().filter(|run| run.state.is_some()).collect()
    }

    fn coalesced_intervals_in(&self, begin: u64, end: u64) -> Vec<AddressInterval> {
        self.map
            .query_range(begin, end)
            .into_iter()
            .filter(|run| run.state.is_some())
            .collect()
    }

    fn state_digest(&self) -> StateDigest {
        let coalesced = self.coalesced_intervals();
        StateDigest::compute(self.totals, [&coalesced[..]])
    }
}
