//! In-process replay dispatcher.
//!
//! Owns the allocator state, the address-space sampler, the revoker and the
//! outputs, and routes each [`TimedEvent`] to them in a fixed order:
//! allocator state first (which may synchronously drive the revoker through
//! reuse notifications), then the address-space sampler, then the revoker
//! for trace-recorded revocations, then the rate-limited outputs.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::rc::Rc;

use crate::config::{ReplayConfig, RevokerKind};
use crate::error::ReplayError;
use crate::lifecycle::ModelLogRecord;
use crate::model::{
    AccountingAddrSpaceModel, AddrSpaceModel, Aggregates, AllocatorAddrSpaceModel,
    MappingAddrSpaceModel, StateDigest,
};
use crate::output::{AllocationMapOutput, CompositeOutput, Emitter, GraphOutput, OutputContext};
use crate::revoker::{
    CompactingStrategy, NaiveStrategy, SweepRecord, SweepStrategy, SweepingRevoker,
};
use crate::trace::{TimedEvent, Timestamp, TraceEvent};

/// End-of-replay report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub revoker: RevokerKind,
    pub events: u64,
    /// Trace time between the first and last event.
    pub duration_ns: u64,
    pub allocator: Aggregates,
    pub addr_space: Aggregates,
    pub swept: u64,
    pub sweep_count: usize,
    pub digest: StateDigest,
}

impl ReplaySummary {
    #[must_use]
    pub const fn swept_mb(&self) -> u64 {
        self.swept >> 20
    }

    #[must_use]
    pub const fn swept_gb(&self) -> u64 {
        self.swept >> 30
    }
}

impl fmt::Display for ReplaySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} swept {} bytes ({}MiB, {}GiB) in {} sweeps over {} events in a {}s trace",
            self.revoker.as_str(),
            self.swept,
            self.swept_mb(),
            self.swept_gb(),
            self.sweep_count,
            self.events,
            self.duration_ns / 1_000_000_000
        )
    }
}

pub struct Replay {
    config: ReplayConfig,
    alloc_state: Box<dyn AddrSpaceModel>,
    addr_space: Box<dyn AddrSpaceModel>,
    revoker: Rc<RefCell<SweepingRevoker>>,
    output: CompositeOutput,
    events: u64,
    first_ns: Option<u64>,
    last_ns: Option<u64>,
}

impl Replay {
    /// Build the models and revoker selected by `config`.
    pub fn new(config: ReplayConfig) -> Result<Self, ReplayError> {
        config.validate()?;
        let capacity = config.sweep_capacity;
        let strategy: Option<Box<dyn SweepStrategy>> = match config.revoker {
            RevokerKind::Naive => Some(Box::new(NaiveStrategy)),
            RevokerKind::Compacting => Some(Box::new(CompactingStrategy)),
            RevokerKind::Accounting => None,
        };
        let revoker = Rc::new(RefCell::new(match strategy {
            Some(strategy) => SweepingRevoker::new(strategy, capacity),
            None => SweepingRevoker::passive(capacity),
        }));

        let alloc_state: Box<dyn AddrSpaceModel>;
        let addr_space: Box<dyn AddrSpaceModel>;
        if config.revoker.tracks_intervals() {
            let mut model = AllocatorAddrSpaceModel::new();
            model.register_subscriber(revoker.clone());
            alloc_state = Box::new(model);
            addr_space = Box::new(MappingAddrSpaceModel::new());
        } else {
            alloc_state = Box::new(AccountingAddrSpaceModel::new());
            addr_space = Box::new(AccountingAddrSpaceModel::new());
        }
        Ok(Self {
            config,
            alloc_state,
            addr_space,
            revoker,
            output: CompositeOutput::new(),
            events: 0,
            first_ns: None,
            last_ns: None,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    #[must_use]
    pub fn alloc_state(&self) -> &dyn AddrSpaceModel {
        self.alloc_state.as_ref()
    }

    #[must_use]
    pub fn addr_space(&self) -> &dyn AddrSpaceModel {
        self.addr_space.as_ref()
    }

    #[must_use]
    pub fn swept(&self) -> u64 {
        self.revoker.borrow().swept()
    }

    #[must_use]
    pub fn sweeps(&self) -> Vec<SweepRecord> {
        self.revoker.borrow().sweeps().to_vec()
    }

    #[must_use]
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Add an arbitrary emitter to the output fan-out.
    pub fn attach_output(&mut self, output: Box<dyn Emitter>) {
        self.output.push(output);
    }

    /// Add the snapshot table. Its header is written immediately.
    pub fn attach_graph_output<W: Write + 'static>(&mut self, writer: W) -> Result<(), ReplayError> {
        let graph = GraphOutput::new(writer, self.config.emit_period_ms)?;
        self.output.push(Box::new(graph));
        Ok(())
    }

    /// Add the allocation map. Needs an interval-tracking allocator model,
    /// since the map both renders intervals and listens for reuse.
    pub fn attach_allocation_map<W: Write + 'static>(
        &mut self,
        writer: W,
    ) -> Result<(), ReplayError> {
        if !self.config.revoker.tracks_intervals() {
            return Err(ReplayError::UnsupportedOutput("allocation map"));
        }
        let map = Rc::new(RefCell::new(AllocationMapOutput::new(writer, &self.config)));
        self.alloc_state.subscribe(map.clone())?;
        self.output.push(Box::new(map));
        Ok(())
    }

    /// Replay one event.
    pub fn dispatch(&mut self, event: &TimedEvent) -> Result<(), ReplayError> {
        let now = event.timestamp();
        if let Some(previous_ns) = self.last_ns
            && now.as_ns() < previous_ns
        {
            return Err(ReplayError::TimestampRegression {
                previous_ns,
                current_ns: now.as_ns(),
            });
        }
        self.first_ns.get_or_insert(now.as_ns());
        self.last_ns = Some(now.as_ns());

        match &event.event {
            TraceEvent::Allocated { stack, begin, end } => {
                self.alloc_state.allocated(now, stack, *begin, *end)?;
                self.addr_space.allocated(now, stack, *begin, *end)?;
            }
            TraceEvent::Reallocated {
                stack,
                old_begin,
                new_begin,
                new_end,
            } => {
                self.alloc_state
                    .reallocated(now, stack, *old_begin, *new_begin, *new_end)?;
                self.addr_space
                    .reallocated(now, stack, *old_begin, *new_begin, *new_end)?;
            }
            TraceEvent::Freed { stack, begin } => {
                self.alloc_state.freed(now, stack, *begin)?;
                self.addr_space.freed(now, stack, *begin)?;
            }
            TraceEvent::Revoked { ranges } => {
                self.alloc_state.revoked(now, ranges)?;
                self.addr_space.revoked(now, ranges)?;
                self.revoker.borrow_mut().revoked(now, ranges)?;
            }
            TraceEvent::Mapped { stack, begin, end } => {
                self.alloc_state.mapped(now, stack, *begin, *end)?;
                self.addr_space.mapped(now, stack, *begin, *end)?;
            }
            TraceEvent::Unmapped { stack, begin, end } => {
                self.alloc_state.unmapped(now, stack, *begin, *end)?;
                self.addr_space.unmapped(now, stack, *begin, *end)?;
            }
            TraceEvent::SizeMeasured { bytes } => self.addr_space.size_measured(*bytes),
            TraceEvent::SweepSizeMeasured { bytes } => self.addr_space.sweep_size_measured(*bytes),
        }
        self.events += 1;

        let swept = self.swept();
        let ctx = OutputContext {
            timestamp: now,
            addr_space: self.addr_space.as_ref(),
            alloc_state: self.alloc_state.as_ref(),
            swept,
        };
        self.output.update(&ctx)
    }

    /// Replay a sequence of events, stopping at the first fatal error.
    pub fn dispatch_all<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a TimedEvent>,
    ) -> Result<(), ReplayError> {
        for event in events {
            self.dispatch(event)?;
        }
        Ok(())
    }

    /// Records of repaired trace anomalies since the last drain.
    pub fn drain_lifecycle_logs(&mut self) -> Vec<ModelLogRecord> {
        self.alloc_state.drain_lifecycle_logs()
    }

    /// Flush every output without a final emission. Used when a replay is
    /// abandoned so rows emitted so far still reach their writers.
    pub fn flush(&mut self) -> Result<(), ReplayError> {
        self.output.flush()
    }

    /// Force one final emission on every output, flush them and report.
    pub fn finish(&mut self) -> Result<ReplaySummary, ReplayError> {
        let swept = self.swept();
        let ctx = OutputContext {
            timestamp: Timestamp::from_ns(self.last_ns.unwrap_or_default()),
            addr_space: self.addr_space.as_ref(),
            alloc_state: self.alloc_state.as_ref(),
            swept,
        };
        self.output.emit(&ctx)?;
        self.output.flush()?;

        let revoker = self.revoker.borrow();
        Ok(ReplaySummary {
            revoker: self.config.revoker,
            events: self.events,
            duration_ns: match (self.first_ns, self.last_ns) {
                (Some(first), Some(last)) => last - first,
                _ => 0,
            },
            allocator: self.alloc_state.aggregates(),
            addr_space: self.addr_space.aggregates(),
            swept: revoker.swept(),
            sweep_count: revoker.sweep_count(),
            digest: self.alloc_state.state_digest(),
        })
    }
}
