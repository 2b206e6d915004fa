//! Allocator address-space state machine.
//!
//! Replays allocator events into two views of the same address space:
//! - an allocation-granular [`TrackedIntervals`] set, used to resolve
//!   `free(begin)` and `realloc(old_begin, ..)` to the allocation they name;
//! - two [`CoalescedIntervalMap`]s, one for the allocation lifecycle
//!   (Allocated, Freed, Revoked) and one for backing memory (Mapped,
//!   Unmapped), used for byte totals and rendering.
//!
//! The two axes never overwrite each other: mapping over a live allocation
//! leaves it allocated. Rendering reads a merged view in which lifecycle
//! states take precedence over backing states.
//!
//! Trace anomalies (overlapping allocations, misfrees, unknown addresses)
//! are repaired and logged. Revoking live memory is fatal.
//!
//! Allocations that reuse freed memory are published to subscribers before
//! they are committed, so a revoker sees the freed state it must sweep.

use crate::error::ReplayError;
use crate::interval::{AddressInterval, IntervalState};
use crate::interval_map::CoalescedIntervalMap;
use crate::lifecycle::{LifecycleLog, LogSite, ModelLogLevel, ModelLogRecord};
use crate::model::{AddrSpaceModel, Aggregates, SharedSubscriber, StateDigest};
use crate::trace::Timestamp;
use crate::tracked::TrackedIntervals;

use IntervalState::{Allocated, Freed, Mapped, Revoked, Unmapped};

/// Stack frames that mark a mapping as made by the allocator itself.
const ALLOCATOR_FRAMES: [&str; 4] = ["malloc", "calloc", "realloc", "free"];

const OVERLAPPING_ALLOCATION: LogSite = LogSite {
    level: ModelLogLevel::Warn,
    symbol: "allocated",
    event: "overlapping_allocation_chopped",
    outcome: "overwritten",
};
const MISFREE: LogSite = LogSite {
    level: ModelLogLevel::Warn,
    symbol: "freed",
    event: "misfree",
    outcome: "freed_covering_interval",
};
const FREE_UNKNOWN: LogSite = LogSite {
    level: ModelLogLevel::Warn,
    symbol: "freed",
    event: "free_unknown_address",
    outcome: "synthesized_one_byte_interval",
};
const REALLOC_UNKNOWN: LogSite = LogSite {
    level: ModelLogLevel::Warn,
    symbol: "reallocated",
    event: "realloc_unknown_address",
    outcome: "treated_as_allocation",
};
const REALLOC_MISMATCH: LogSite = LogSite {
    level: ModelLogLevel::Warn,
    symbol: "reallocated",
    event: "realloc_source_mismatch",
    outcome: "used_covering_interval",
};
const REALLOC_NON_ALLOCATED: LogSite = LogSite {
    level: ModelLogLevel::Error,
    symbol: "reallocated",
    event: "realloc_non_allocated",
    outcome: "assumed_allocated",
};

fn empty_range(symbol: &'static str) -> LogSite {
    LogSite {
        level: ModelLogLevel::Warn,
        symbol,
        event: "empty_range_ignored",
        outcome: "ignored",
    }
}

/// The allocator's address-space state, as seen by reuse subscribers.
#[derive(Debug, Clone)]
pub struct AllocatorState {
    tracked: TrackedIntervals,
    map: CoalescedIntervalMap,
    backing: CoalescedIntervalMap,
    totals: Aggregates,
    now: Timestamp,
    log: LifecycleLog,
}

impl AllocatorState {
    fn new() -> Self {
        Self {
            tracked: TrackedIntervals::new(),
            map: CoalescedIntervalMap::new(),
            backing: CoalescedIntervalMap::new(),
            totals: Aggregates::default(),
            now: Timestamp::default(),
            log: LifecycleLog::new("model::allocator"),
        }
    }

    /// Trace time of the event being processed.
    #[must_use]
    pub fn now(&self) -> Timestamp {
        self.now
    }

    #[must_use]
    pub fn aggregates(&self) -> Aggregates {
        self.totals
    }

    /// The allocation-granular interval covering `point`.
    #[must_use]
    pub fn interval_at(&self, point: u64) -> Option<AddressInterval> {
        self.tracked.covering(point)
    }

    /// Allocation-granular intervals overlapping `[begin, end)`, unclipped.
    #[must_use]
    pub fn intervals_in(&self, begin: u64, end: u64) -> Vec<AddressInterval> {
        self.tracked.overlapping(begin, end)
    }

    /// All allocation-granular intervals in `state`, in address order.
    #[must_use]
    pub fn intervals_with_state(&self, state: IntervalState) -> Vec<AddressInterval> {
        self.tracked.iter().filter(|i| i.has_state(state)).collect()
    }

    /// Freed bytes inside `[begin, end)`.
    #[must_use]
    pub fn freed_bytes_in(&self, begin: u64, end: u64) -> u64 {
        self.tracked
            .overlapping(begin, end)
            .iter()
            .filter(|ival| ival.has_state(Freed))
            .map(|ival| ival.overlap_len(begin, end))
            .sum()
    }

    /// Grow the allocation-granular interval at `point` across touching
    /// neighbours of the same state or one of `absorb`.
    #[must_use]
    pub fn coalesced_around(
        &self,
        point: u64,
        absorb: &[IntervalState],
    ) -> Option<AddressInterval> {
        self.tracked.coalesced_around(point, absorb)
    }

    /// The merged run covering `point`, if it has an explicit state.
    #[must_use]
    pub fn coalesced_interval_at(&self, point: u64) -> Option<AddressInterval> {
        let run = self.map.query(point)?;
        if run.state.is_some() {
            return Some(run);
        }
        self.backing
            .query(point)
            .and_then(|backing| backing.clipped(run.begin, run.end))
            .filter(|backing| backing.state.is_some())
    }

    /// Merged runs with an explicit state, in address order.
    #[must_use]
    pub fn coalesced_intervals(&self) -> Vec<AddressInterval> {
        self.overlay(self.map.iter())
    }

    #[must_use]
    pub fn coalesced_intervals_in(&self, begin: u64, end: u64) -> Vec<AddressInterval> {
        self.overlay(self.map.query_range(begin, end))
    }

    /// Backing-memory runs (Mapped, Unmapped) only.
    #[must_use]
    pub fn backing_intervals(&self) -> Vec<AddressInterval> {
        self.backing.iter().filter(|run| run.state.is_some()).collect()
    }

    /// Fill the no-data gaps of lifecycle `runs` from the backing map.
    fn overlay(&self, runs: impl IntoIterator<Item = AddressInterval>) -> Vec<AddressInterval> {
        let mut merged: Vec<AddressInterval> = Vec::new();
        for run in runs {
            let pieces = match run.state {
                Some(_) => vec![run],
                None => self.backing.query_range(run.begin, run.end),
            };
            for piece in pieces.into_iter().filter(|p| p.state.is_some()) {
                match merged.last_mut() {
                    Some(last) if last.end == piece.begin && last.state == piece.state => {
                        last.end = piece.end;
                    }
                    _ => merged.push(piece),
                }
            }
        }
        merged
    }

    /// Mark every range Revoked.
    ///
    /// Fails without touching any range if one of them still holds an
    /// allocation: reclaiming live memory would corrupt the model.
    pub fn revoke(&mut self, ranges: &[(u64, u64)]) -> Result<(), ReplayError> {
        let live: Vec<AddressInterval> = ranges
            .iter()
            .flat_map(|&(begin, end)| self.tracked.overlapping(begin, end))
            .filter(|ival| ival.has_state(Allocated))
            .collect();
        if !live.is_empty() {
            return Err(ReplayError::RevokeAllocated {
                timestamp_ns: self.now.as_ns(),
                intervals: live,
            });
        }

        for &(begin, end) in ranges {
            match AddressInterval::checked(begin, end, Some(Revoked)) {
                Some(ival) => self.commit(ival),
                None => self.warn(empty_range("revoked"), Some(begin), Some(end), ""),
            }
        }
        Ok(())
    }

    fn warn(&mut self, site: LogSite, begin: Option<u64>, end: Option<u64>, details: impl Into<String>) {
        self.log.record(self.now, site, begin, end, details);
    }

    /// Update the lifecycle map and the allocated total.
    fn update_map(&mut self, interval: AddressInterval) {
        debug_assert!(!interval.has_state(Mapped) && !interval.has_state(Unmapped));
        let delta = self.map.assign(interval);
        self.totals.allocated_size = delta.apply(Allocated, self.totals.allocated_size);
    }

    /// Update the backing map and the mapped total.
    fn update_backing(&mut self, interval: AddressInterval) {
        let delta = self.backing.assign(interval);
        self.totals.mapped_size = delta.apply(Mapped, self.totals.mapped_size);
    }

    /// Overwrite both views with `interval`.
    fn commit(&mut self, interval: AddressInterval) {
        self.update_map(interval);
        self.tracked.overwrite(interval);
    }
}

/// Full allocation lifecycle model with reuse publication.
pub struct AllocatorAddrSpaceModel {
    state: AllocatorState,
    subscribers: Vec<SharedSubscriber>,
}

impl AllocatorAddrSpaceModel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: AllocatorState::new(),
            subscribers: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &AllocatorState {
        &self.state
    }

    /// Subscribers are notified in registration order.
    pub fn register_subscriber(&mut self, subscriber: SharedSubscriber) {
        self.subscribers.push(subscriber);
    }

    #[must_use]
    pub fn lifecycle_logs(&self) -> &[ModelLogRecord] {
        self.state.log.records()
    }

    fn publish_reused(&mut self, begin: u64, end: u64) -> Result<(), ReplayError> {
        for subscriber in &self.subscribers {
            subscriber.borrow_mut().reused(&mut self.state, begin, end)?;
        }
        Ok(())
    }

    pub fn allocate(&mut self, now: Timestamp, begin: u64, end: u64) -> Result<(), ReplayError> {
        self.state.now = now;
        let Some(interval) = AddressInterval::checked(begin, end, Some(Allocated)) else {
            self.state
                .warn(empty_range("allocated"), Some(begin), Some(end), "");
            return Ok(());
        };

        let overlaps = self.state.tracked.overlapping(begin, end);
        let live: Vec<AddressInterval> = overlaps
            .iter()
            .copied()
            .filter(|o| o.has_state(Allocated))
            .collect();
        if !live.is_empty() {
            let details = format!(
                "new allocation {interval} overlaps existing allocations {}, chopping them out",
                crate::interval::display_list(&live)
            );
            self.state
                .warn(OVERLAPPING_ALLOCATION, Some(begin), Some(end), details);
        }

        let mut freed = overlaps.iter().filter(|o| o.has_state(Freed));
        if let Some(first) = freed.next() {
            let last = freed.last().unwrap_or(first);
            let reused_begin = first.begin.max(begin);
            let reused_end = last.end.min(end);
            self.publish_reused(reused_begin, reused_end)?;
        }

        self.state.commit(interval);
        Ok(())
    }

    pub fn reallocate(
        &mut self,
        now: Timestamp,
        old_begin: u64,
        new_begin: u64,
        new_end: u64,
    ) -> Result<(), ReplayError> {
        self.state.now = now;
        let Some(old) = self.state.tracked.covering(old_begin) else {
            self.state.warn(
                REALLOC_UNKNOWN,
                Some(old_begin),
                None,
                format!("no existing allocation to realloc at {old_begin:x}, doing just alloc"),
            );
            return self.allocate(now, new_begin, new_end);
        };
        if old.begin != old_begin {
            self.state.warn(
                REALLOC_MISMATCH,
                Some(old_begin),
                None,
                format!("realloc({old_begin:x}) names the middle of {old}"),
            );
        }
        if !old.has_state(Allocated) {
            self.state.warn(
                REALLOC_NON_ALLOCATED,
                Some(old.begin),
                Some(old.end),
                format!("realloc of non-allocated interval {old}, assuming it is allocated"),
            );
        }

        match AddressInterval::checked(new_begin, new_end, Some(Allocated)) {
            Some(new) if new.overlaps(&old) => {
                // Only the parts of the old block outside the new one are released.
                self.state
                    .update_map(AddressInterval::with_state(old.begin, old.end, Freed));
                self.state.tracked.remove(old.begin);
                if let Some(left) = AddressInterval::checked(old.begin, new.begin, Some(Freed)) {
                    self.state.tracked.insert(left);
                }
                if let Some(right) = AddressInterval::checked(new.end, old.end, Some(Freed)) {
                    self.state.tracked.insert(right);
                }
            }
            _ => self.free(now, old_begin),
        }

        self.allocate(now, new_begin, new_end)
    }

    pub fn free(&mut self, now: Timestamp, begin: u64) {
        self.state.now = now;
        let freed = match self.state.tracked.covering(begin) {
            Some(found) => {
                if found.begin != begin || !found.has_state(Allocated) {
                    self.state.warn(
                        MISFREE,
                        Some(begin),
                        None,
                        format!("freed({begin:x}) misfrees {found}"),
                    );
                }
                self.state.tracked.remove(found.begin);
                Some(AddressInterval::with_state(found.begin, found.end, Freed))
            }
            None => {
                self.state.warn(
                    FREE_UNKNOWN,
                    Some(begin),
                    None,
                    format!("no existing allocation to free at {begin:x}, defaulting to one of size 1"),
                );
                AddressInterval::checked(begin, begin.saturating_add(1), Some(Freed))
            }
        };
        match freed {
            Some(interval) => self.state.commit(interval),
            None => self.state.warn(empty_range("freed"), Some(begin), None, ""),
        }
    }

    pub fn revoke(&mut self, now: Timestamp, ranges: &[(u64, u64)]) -> Result<(), ReplayError> {
        self.state.now = now;
        self.state.revoke(ranges)
    }

    /// Record a mapping made by the allocator for its own use.
    ///
    /// Mappings whose call stack shows no allocator entry point are ignored.
    pub fn map(&mut self, now: Timestamp, callstack: &str, begin: u64, end: u64) {
        self.state.now = now;
        if !ALLOCATOR_FRAMES.iter().any(|frame| callstack.contains(frame)) {
            return;
        }
        match AddressInterval::checked(begin, end, Some(Mapped)) {
            Some(ival) => self.state.update_backing(ival),
            None => self.state.warn(empty_range("mapped"), Some(begin), Some(end), ""),
        }
    }

    pub fn unmap(&mut self, now: Timestamp, begin: u64, end: u64) {
        self.state.now = now;
        match AddressInterval::checked(begin, end, Some(Unmapped)) {
            Some(ival) => self.state.update_backing(ival),
            None => self.state.warn(empty_range("unmapped"), Some(begin), Some(end), ""),
        }
    }
}

impl Default for AllocatorAddrSpaceModel {
    fn default() -> Self {
        Self::new()
    }
}

impl AddrSpaceModel for AllocatorAddrSpaceModel {
    fn name(&self) -> &'static str {
        "allocator"
    }

    fn aggregates(&self) -> Aggregates {
        self.state.totals
    }

    fn allocated(
        &mut self,
        now: Timestamp,
        _stack: &str,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.allocate(now, begin, end)
    }

    fn reallocated(
        &mut self,
        now: Timestamp,
        _stack: &str,
        old_begin: u64,
        new_begin: u64,
        new_end: u64,
    ) -> Result<(), ReplayError> {
        self.reallocate(now, old_begin, new_begin, new_end)
    }

    fn freed(&mut self, now: Timestamp, _stack: &str, begin: u64) -> Result<(), ReplayError> {
        self.free(now, begin);
        Ok(())
    }

    fn revoked(&mut self, now: Timestamp, ranges: &[(u64, u64)]) -> Result<(), ReplayError> {
        self.revoke(now, ranges)
    }

    fn mapped(
        &mut self,
        now: Timestamp,
        stack: &str,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.map(now, stack, begin, end);
        Ok(())
    }

    fn unmapped(
        &mut self,
        now: Timestamp,
        _stack: &str,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.unmap(now, begin, end);
        Ok(())
    }

    fn size_measured(&mut self, bytes: u64) {
        self.state.totals.size = bytes;
    }

    fn sweep_size_measured(&mut self, bytes: u64) {
        self.state.totals.sweep_size = bytes;
    }

    fn coalesced_intervals(&self) -> Vec<AddressInterval> {
        self.state.coalesced_intervals()
    }

    fn coalesced_intervals_in(&self, begin: u64, end: u64) -> Vec<AddressInterval> {
        self.state.coalesced_intervals_in(begin, end)
    }

    fn subscribe(&mut self, subscriber: SharedSubscriber) -> Result<(), ReplayError> {
        self.register_subscriber(subscriber);
        Ok(())
    }

    fn drain_lifecycle_logs(&mut self) -> Vec<ModelLogRecord> {
        self.state.log.drain()
    }

    fn state_digest(&self) -> StateDigest {
        let tracked: Vec<AddressInterval> = self.state.tracked.iter().collect();
        let coalesced = self.state.coalesced_intervals();
        let backing = self.state.backing_intervals();
        StateDigest::compute(
            self.state.totals,
            [&tracked[..], &coalesced[..], &backing[..]],
        )
    }
}
