//! Tab-separated snapshot table.

use std::io::Write;

use crate::error::ReplayError;
use crate::output::{Emitter, OutputContext, RateLimiter};

pub const GRAPH_HEADER: &str =
    "#timestamp\taddr-space-total\taddr-space-sweep\tallocator-mapped\tallocator-allocd\tallocator-swept";

/// One line per emission:
/// `timestamp, address-space total, address-space sweep footprint,
/// allocator mapped, allocator allocated, cumulative swept`.
pub struct GraphOutput<W: Write> {
    writer: W,
    limiter: RateLimiter,
    lines: u64,
}

impl<W: Write> GraphOutput<W> {
    /// Create the table and write its header line.
    pub fn new(mut writer: W, period_ms: u64) -> std::io::Result<Self> {
        writeln!(writer, "{GRAPH_HEADER}")?;
        Ok(Self {
            writer,
            limiter: RateLimiter::new(period_ms),
            lines: 0,
        })
    }

    /// Snapshot lines written so far, header excluded.
    #[must_use]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        let space = ctx.addr_space.aggregates();
        let alloc = ctx.alloc_state.aggregates();
        writeln!(
            self.writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            ctx.timestamp.as_ns(),
            space.size,
            space.sweep_size,
            alloc.mapped_size,
            alloc.allocated_size,
            ctx.swept
        )?;
        self.lines += 1;
        Ok(())
    }
}

impl<W: Write> Emitter for GraphOutput<W> {
    fn update(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        if self.limiter.admit(ctx.timestamp) {
            self.write_line(ctx)?;
        }
        Ok(())
    }

    fn emit(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        self.limiter.mark(ctx.timestamp);
        self.write_line(ctx)
    }

    fn flush(&mut self) -> Result<(), ReplayError> {
        self.writer.flush()?;
        Ok(())
    }
}
