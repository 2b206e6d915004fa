//! Coalesced interval map over the whole address domain.
//!
//! The map is a partition of `[0, ADDRESS_DOMAIN_END)` into maximal runs.
//! Each run is keyed by its start; it extends to the next key (or the end of
//! the domain). Adjacent runs never carry the same state, so every stored run
//! is maximal. A freshly created map holds the single no-data sentinel run.

use std::collections::BTreeMap;
use std::ops::Bound;

use crate::interval::{ADDRESS_DOMAIN_END, AddressInterval, IntervalState};

/// Byte counts per explicit state over some window of runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateTally {
    bytes: [u64; IntervalState::ALL.len()],
}

impl StateTally {
    pub fn add(&mut self, state: IntervalState, bytes: u64) {
        let slot = &mut self.bytes[state.index()];
        *slot = slot.saturating_add(bytes);
    }

    #[must_use]
    pub fn get(&self, state: IntervalState) -> u64 {
        self.bytes[state.index()]
    }
}

/// Per-state byte counts of the touched window before and after an `assign`.
///
/// Runs crossing the window edges are counted whole in both tallies; the
/// parts outside the window are unchanged by the assignment, so the
/// difference is exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssignDelta {
    pub before: StateTally,
    pub after: StateTally,
}

impl AssignDelta {
    /// Apply this delta for `state` to a running total.
    #[must_use]
    pub fn apply(&self, state: IntervalState, total: u64) -> u64 {
        total
            .saturating_sub(self.before.get(state))
            .saturating_add(self.after.get(state))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoalescedIntervalMap {
    runs: BTreeMap<u64, Option<IntervalState>>,
}

impl CoalescedIntervalMap {
    #[must_use]
    pub fn new() -> Self {
        let mut runs = BTreeMap::new();
        runs.insert(0, None);
        Self { runs }
    }

    /// Number of stored runs, including no-data runs.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    fn run_end(&self, begin: u64) -> u64 {
        self.runs
            .range((Bound::Excluded(begin), Bound::Unbounded))
            .next()
            .map_or(ADDRESS_DOMAIN_END, |(&next, _)| next)
    }

    fn run_start_containing(&self, point: u64) -> (u64, Option<IntervalState>) {
        match self.runs.range(..=point).next_back() {
            Some((&begin, &state)) => (begin, state),
            None => panic!("bug: interval map lost its domain origin; no run covers {point:x}"),
        }
    }

    /// The run covering `point`. `None` only outside the modelled domain.
    ///
    /// The returned interval carries `state: None` when the region has no data.
    #[must_use]
    pub fn query(&self, point: u64) -> Option<AddressInterval> {
        if point >= ADDRESS_DOMAIN_END {
            return None;
        }
        let (begin, state) = self.run_start_containing(point);
        let run = AddressInterval {
            begin,
            end: self.run_end(begin),
            state,
        };
        assert!(
            run.contains(point),
            "bug: overlapping address intervals at {point:x}: {run}"
        );
        Some(run)
    }

    /// Runs overlapping `[begin, end)`, whole (not clipped), in address order.
    fn runs_overlapping(&self, begin: u64, end: u64) -> Vec<AddressInterval> {
        if begin >= end || begin >= ADDRESS_DOMAIN_END {
            return Vec::new();
        }
        let (first, _) = self.run_start_containing(begin);
        let starts: Vec<(u64, Option<IntervalState>)> = self
            .runs
            .range(first..end)
            .map(|(&b, &s)| (b, s))
            .collect();
        let mut out = Vec::with_capacity(starts.len());
        for (i, &(b, state)) in starts.iter().enumerate() {
            let e = match starts.get(i + 1) {
                Some(&(next, _)) => next,
                None => self.run_end(b),
            };
            out.push(AddressInterval { begin: b, end: e, state });
        }
        out
    }

    /// Runs overlapping `[begin, end)`, clipped to it, in address order.
    ///
    /// No-data runs are included; callers filter on `state`.
    #[must_use]
    pub fn query_range(&self, begin: u64, end: u64) -> Vec<AddressInterval> {
        self.runs_overlapping(begin, end)
            .into_iter()
            .filter_map(|run| run.clipped(begin, end))
            .collect()
    }

    /// All runs in address order, including no-data runs.
    pub fn iter(&self) -> impl Iterator<Item = AddressInterval> + '_ {
        let mut starts = self.runs.iter().peekable();
        std::iter::from_fn(move || {
            let (&begin, &state) = starts.next()?;
            let end = starts.peek().map_or(ADDRESS_DOMAIN_END, |&(&next, _)| next);
            Some(AddressInterval { begin, end, state })
        })
    }

    fn tally(&self, begin: u64, end: u64) -> StateTally {
        let mut tally = StateTally::default();
        for run in self.runs_overlapping(begin, end) {
            if let Some(state) = run.state {
                tally.add(state, run.len());
            }
        }
        tally
    }

    /// Overwrite exactly `[begin, end)` with the interval's state and merge
    /// with same-state neighbours.
    ///
    /// Returns per-state byte counts of the touched window before and after,
    /// so callers can maintain running totals without rescanning the map.
    pub fn assign(&mut self, interval: AddressInterval) -> AssignDelta {
        let AddressInterval { begin, end, state } = interval;
        assert!(
            begin < end && end <= ADDRESS_DOMAIN_END,
            "assign outside the modelled domain: {interval}"
        );

        let window_begin = begin.saturating_sub(1);
        let window_end = end.saturating_add(1).min(ADDRESS_DOMAIN_END);
        let before = self.tally(window_begin, window_end);

        if end < ADDRESS_DOMAIN_END && !self.runs.contains_key(&end) {
            let (_, tail_state) = self.run_start_containing(end);
            self.runs.insert(end, tail_state);
        }
        let covered: Vec<u64> = self.runs.range(begin..end).map(|(&b, _)| b).collect();
        for b in covered {
            self.runs.remove(&b);
        }
        self.runs.insert(begin, state);

        if self.runs.get(&end) == Some(&state) {
            self.runs.remove(&end);
        }
        if let Some((_, &prev)) = self.runs.range(..begin).next_back()
            && prev == state
        {
            self.runs.remove(&begin);
        }

        let after = self.tally(window_begin, window_end);
        AssignDelta { before, after }
    }

    /// Total bytes currently carrying `state`. Full scan; for tests and audits.
    #[must_use]
    pub fn total_bytes(&self, state: IntervalState) -> u64 {
        self.iter()
            .filter(|run| run.state == Some(state))
            .map(|run| run.len())
            .sum()
    }
}

impl Default for CoalescedIntervalMap {
    fn default() -> Self {
        Self::new()
    }
}
