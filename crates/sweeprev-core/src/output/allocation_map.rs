//! Textual allocation map.
//!
//! Each emission writes a `---` separator, then one line per memory pool:
//! `begin-end chunks chunk_size`, bounds in hex. A pool is a run of occupied
//! coalesced intervals whose gaps stay below the growth threshold. Each pool
//! is cut into a fixed number of chunks, rendered as:
//!
//! | char | meaning |
//! |------|---------|
//! | `~`  | overlaps memory reused since the previous map |
//! | `0`  | only mapped, unmapped, freed or revoked memory |
//! | `#`  | only allocated memory, covering at least the allocated fraction |
//! | `=`  | anything else |

use std::io::Write;

use crate::config::{FRACTION_SCALE, ReplayConfig};
use crate::error::ReplayError;
use crate::interval::{AddressInterval, IntervalState};
use crate::model::{AddrSpaceModel, AllocatorState, ReuseSubscriber};
use crate::output::{Emitter, OutputContext, RateLimiter};

pub const CHUNK_REUSED: char = '~';
pub const CHUNK_FREED: char = '0';
pub const CHUNK_ALLOCATED: char = '#';
pub const CHUNK_FRAGMENTED: char = '=';

/// Group occupied intervals into pools.
///
/// Unmapped intervals are not occupied. `intervals` must be sorted and
/// disjoint.
#[must_use]
pub fn memory_pools(intervals: &[AddressInterval], gap_threshold: u64) -> Vec<(u64, u64)> {
    let mut pools: Vec<(u64, u64)> = Vec::new();
    for ival in intervals
        .iter()
        .filter(|ival| !ival.has_state(IntervalState::Unmapped))
    {
        match pools.last_mut() {
            Some((_, end)) if ival.begin.saturating_sub(*end) < gap_threshold => *end = ival.end,
            _ => pools.push((ival.begin, ival.end)),
        }
    }
    pools
}

/// Chunk bounds for a pool and the nominal chunk size.
///
/// The first `size % chunks` chunks are one byte wider so the chunks tile
/// the pool exactly. A pool smaller than `chunks` bytes is a single chunk.
#[must_use]
pub fn chunk_bounds(begin: u64, end: u64, chunks: usize) -> (Vec<(u64, u64)>, u64) {
    let size = end - begin;
    let n = chunks.max(1) as u64;
    let (chunk_size, rem) = match size / n {
        0 => return (vec![(begin, end)], size),
        c => (c, size % n),
    };
    let mut bounds = Vec::with_capacity(chunks);
    let mut cursor = begin;
    for i in 0..n {
        let width = if i < rem { chunk_size + 1 } else { chunk_size };
        bounds.push((cursor, cursor + width));
        cursor += width;
    }
    debug_assert_eq!(cursor, end);
    (bounds, chunk_size)
}

pub struct AllocationMapOutput<W: Write> {
    writer: W,
    limiter: RateLimiter,
    gap_threshold: u64,
    chunks: usize,
    allocated_fraction_ppb: u64,
    /// Ranges reused since the last render.
    reused: Vec<(u64, u64)>,
}

impl<W: Write> AllocationMapOutput<W> {
    #[must_use]
    pub fn new(writer: W, config: &ReplayConfig) -> Self {
        Self {
            writer,
            limiter: RateLimiter::new(config.emit_period_ms),
            gap_threshold: config.pool_gap_threshold,
            chunks: config.chunks_per_pool,
            allocated_fraction_ppb: config.allocated_fraction_ppb(),
            reused: Vec::new(),
        }
    }

    /// Reused ranges buffered for the next render.
    #[must_use]
    pub fn pending_reuse(&self) -> &[(u64, u64)] {
        &self.reused
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn chunk_state(&self, alloc_state: &dyn AddrSpaceModel, begin: u64, end: u64) -> char {
        if self.reused.iter().any(|&(b, e)| b < end && begin < e) {
            return CHUNK_REUSED;
        }
        let covering = alloc_state.coalesced_intervals_in(begin, end);
        if covering
            .iter()
            .all(|ival| ival.state.is_some_and(IntervalState::is_reclaimed))
        {
            return CHUNK_FREED;
        }
        let all_allocated = covering
            .iter()
            .all(|ival| ival.has_state(IntervalState::Allocated));
        let coverage: u64 = covering.iter().map(AddressInterval::len).sum();
        let threshold = u128::from(self.allocated_fraction_ppb) * u128::from(end - begin);
        if all_allocated && u128::from(coverage) * u128::from(FRACTION_SCALE) >= threshold {
            CHUNK_ALLOCATED
        } else {
            CHUNK_FRAGMENTED
        }
    }

    fn render(&mut self, alloc_state: &dyn AddrSpaceModel) -> Result<(), ReplayError> {
        let pools = memory_pools(&alloc_state.coalesced_intervals(), self.gap_threshold);
        writeln!(self.writer, "---")?;
        for (begin, end) in pools {
            let (bounds, chunk_size) = chunk_bounds(begin, end, self.chunks);
            let chunks: String = bounds
                .iter()
                .map(|&(cb, ce)| self.chunk_state(alloc_state, cb, ce))
                .collect();
            writeln!(self.writer, "{begin:x}-{end:x} {chunks} {chunk_size}")?;
        }
        self.reused.clear();
        Ok(())
    }
}

impl<W: Write> ReuseSubscriber for AllocationMapOutput<W> {
    fn reused(
        &mut self,
        _state: &mut AllocatorState,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.reused.push((begin, end));
        Ok(())
    }
}

impl<W: Write> Emitter for AllocationMapOutput<W> {
    fn update(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        if self.limiter.admit(ctx.timestamp) {
            self.render(ctx.alloc_state)?;
        }
        Ok(())
    }

    fn emit(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        self.limiter.mark(ctx.timestamp);
        self.render(ctx.alloc_state)
    }

    fn flush(&mut self) -> Result<(), ReplayError> {
        self.writer.flush()?;
        Ok(())
    }
}
