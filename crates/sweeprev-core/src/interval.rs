//! Address intervals tagged with a lifecycle state.
//!
//! An [`AddressInterval`] is a half-open range `[begin, end)` carrying an
//! optional [`IntervalState`]. `None` means "no data": the region has never
//! been touched by an event, which is distinct from every explicit state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Exclusive upper bound of the modelled address domain.
///
/// The top byte of the 64-bit space is not representable as a half-open
/// interval with `u64` bounds; traces never reach it.
pub const ADDRESS_DOMAIN_END: u64 = u64::MAX;

/// Lifecycle state of an address range.
///
/// `Allocated`, `Freed` and `Revoked` describe allocations. `Mapped` and
/// `Unmapped` describe backing memory obtained by the allocator itself and
/// form an orthogonal axis stored in the same map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalState {
    Allocated,
    Freed,
    Revoked,
    Mapped,
    Unmapped,
}

impl IntervalState {
    /// All states, in declaration order.
    pub const ALL: [IntervalState; 5] = [
        IntervalState::Allocated,
        IntervalState::Freed,
        IntervalState::Revoked,
        IntervalState::Mapped,
        IntervalState::Unmapped,
    ];

    /// Dense index used by per-state tallies.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Allocated => 0,
            Self::Freed => 1,
            Self::Revoked => 2,
            Self::Mapped => 3,
            Self::Unmapped => 4,
        }
    }

    /// Returns true for the allocation lifecycle states.
    #[must_use]
    pub const fn is_lifecycle(self) -> bool {
        matches!(self, Self::Allocated | Self::Freed | Self::Revoked)
    }

    /// Returns true for states whose bytes hold no live allocation.
    #[must_use]
    pub const fn is_reclaimed(self) -> bool {
        !matches!(self, Self::Allocated)
    }
}

impl fmt::Display for IntervalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Allocated => "Allocated",
            Self::Freed => "Freed",
            Self::Revoked => "Revoked",
            Self::Mapped => "Mapped",
            Self::Unmapped => "Unmapped",
        };
        f.write_str(name)
    }
}

/// Half-open address range with an optional state.
///
/// Ordered by `(begin, end)` first; the state only breaks ties so that the
/// order stays consistent with equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddressInterval {
    pub begin: u64,
    pub end: u64,
    pub state: Option<IntervalState>,
}

impl AddressInterval {
    /// Create an interval. Panics if `begin >= end`.
    #[must_use]
    pub fn new(begin: u64, end: u64, state: Option<IntervalState>) -> Self {
        assert!(
            begin < end,
            "address interval must be non-empty: [{begin:x}, {end:x})"
        );
        Self { begin, end, state }
    }

    /// Interval with an explicit state.
    #[must_use]
    pub fn with_state(begin: u64, end: u64, state: IntervalState) -> Self {
        Self::new(begin, end, Some(state))
    }

    /// Returns the interval if `begin < end`, `None` for empty or inverted bounds.
    #[must_use]
    pub fn checked(begin: u64, end: u64, state: Option<IntervalState>) -> Option<Self> {
        (begin < end).then_some(Self { begin, end, state })
    }

    /// The sentinel covering the whole modelled domain with no data.
    #[must_use]
    pub const fn domain() -> Self {
        Self {
            begin: 0,
            end: ADDRESS_DOMAIN_END,
            state: None,
        }
    }

    /// Size in bytes.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end - self.begin
    }

    /// Never true for a constructed interval; present for API symmetry.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    #[must_use]
    pub const fn contains(&self, point: u64) -> bool {
        self.begin <= point && point < self.end
    }

    /// True when the two ranges share at least one byte.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    /// True when the range shares at least one byte with `[begin, end)`.
    #[must_use]
    pub const fn overlaps_range(&self, begin: u64, end: u64) -> bool {
        self.begin < end && begin < self.end
    }

    /// Entirely below `other`, touching allowed.
    #[must_use]
    pub const fn strictly_before(&self, other: &Self) -> bool {
        self.end <= other.begin
    }

    /// Entirely above `other`, touching allowed.
    #[must_use]
    pub const fn strictly_after(&self, other: &Self) -> bool {
        self.begin >= other.end
    }

    /// The part of `self` inside `[begin, end)`, if any.
    #[must_use]
    pub fn clipped(&self, begin: u64, end: u64) -> Option<Self> {
        Self::checked(self.begin.max(begin), self.end.min(end), self.state)
    }

    /// Number of bytes shared with `[begin, end)`.
    #[must_use]
    pub fn overlap_len(&self, begin: u64, end: u64) -> u64 {
        self.end.min(end).saturating_sub(self.begin.max(begin))
    }

    #[must_use]
    pub fn has_state(&self, state: IntervalState) -> bool {
        self.state == Some(state)
    }
}

impl fmt::Display for AddressInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            Some(state) => write!(f, "AddrIval({:x}, {:x}, {state})", self.begin, self.end),
            None => write!(f, "AddrIval({:x}, {:x}, None)", self.begin, self.end),
        }
    }
}

/// Render a list of intervals as `[a, b, ...]` for diagnostics.
pub(crate) fn display_list(intervals: &[AddressInterval]) -> String {
    let parts: Vec<String> = intervals.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}
