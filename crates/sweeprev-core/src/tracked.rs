//! Allocation-granular interval set.
//!
//! Unlike [`CoalescedIntervalMap`](crate::interval_map::CoalescedIntervalMap),
//! this set keeps every allocation as its own entry so that `free(begin)` can
//! find the allocation starting at `begin`. Entries are disjoint; gaps mean
//! no data.

use std::collections::BTreeMap;

use crate::interval::{AddressInterval, IntervalState, display_list};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedIntervals {
    by_begin: BTreeMap<u64, AddressInterval>,
}

impl TrackedIntervals {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_begin.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_begin.is_empty()
    }

    /// The single entry covering `point`.
    ///
    /// Panics if more than one entry covers it: that is a defect in this
    /// set, never a property of the trace.
    #[must_use]
    pub fn covering(&self, point: u64) -> Option<AddressInterval> {
        let mut hits = self
            .by_begin
            .range(..=point)
            .rev()
            .take(2)
            .map(|(_, ival)| *ival)
            .filter(|ival| ival.contains(point));
        let first = hits.next();
        if let Some(second) = hits.next() {
            let found: Vec<AddressInterval> = first.into_iter().chain([second]).collect();
            panic!(
                "bug: overlapping address intervals at {point:x} {}",
                display_list(&found)
            );
        }
        first
    }

    /// Entries sharing at least one byte with `[begin, end)`, in address order.
    #[must_use]
    pub fn overlapping(&self, begin: u64, end: u64) -> Vec<AddressInterval> {
        if begin >= end {
            return Vec::new();
        }
        let mut out = Vec::new();
        if let Some((_, prev)) = self.by_begin.range(..begin).next_back()
            && prev.end > begin
        {
            out.push(*prev);
        }
        out.extend(self.by_begin.range(begin..end).map(|(_, ival)| *ival));
        out
    }

    /// All entries in address order.
    pub fn iter(&self) -> impl Iterator<Item = AddressInterval> + '_ {
        self.by_begin.values().copied()
    }

    /// Insert an entry. The caller must have cleared the range first.
    pub fn insert(&mut self, interval: AddressInterval) {
        debug_assert!(
            self.overlapping(interval.begin, interval.end).is_empty(),
            "bug: inserting {interval} over {}",
            display_list(&self.overlapping(interval.begin, interval.end))
        );
        self.by_begin.insert(interval.begin, interval);
    }

    /// Remove the entry starting at `begin`.
    pub fn remove(&mut self, begin: u64) -> Option<AddressInterval> {
        self.by_begin.remove(&begin)
    }

    /// Cut `[begin, end)` out of every entry, keeping the remainders.
    pub fn chop(&mut self, begin: u64, end: u64) {
        for ival in self.overlapping(begin, end) {
            self.by_begin.remove(&ival.begin);
            if let Some(left) = AddressInterval::checked(ival.begin, begin, ival.state) {
                self.by_begin.insert(left.begin, left);
            }
            if let Some(right) = AddressInterval::checked(end, ival.end, ival.state) {
                self.by_begin.insert(right.begin, right);
            }
        }
    }

    /// Replace whatever occupies the interval's range with the interval.
    pub fn overwrite(&mut self, interval: AddressInterval) {
        self.chop(interval.begin, interval.end);
        self.by_begin.insert(interval.begin, interval);
    }

    /// Grow the entry covering `point` across touching neighbours whose state
    /// is the entry's own or one of `absorb`.
    ///
    /// The result carries the state of the entry at `point`.
    #[must_use]
    pub fn coalesced_around(
        &self,
        point: u64,
        absorb: &[IntervalState],
    ) -> Option<AddressInterval> {
        let seed = self.covering(point)?;
        let joins = |ival: &AddressInterval| {
            ival.state == seed.state || ival.state.is_some_and(|s| absorb.contains(&s))
        };

        let mut begin = seed.begin;
        while let Some(left) = begin.checked_sub(1).and_then(|p| self.covering(p)) {
            if !joins(&left) {
                break;
            }
            begin = left.begin;
        }
        let mut end = seed.end;
        while let Some(right) = self.covering(end) {
            if !joins(&right) {
                break;
            }
            end = right.end;
        }
        Some(AddressInterval {
            begin,
            end,
            state: seed.state,
        })
    }
}
