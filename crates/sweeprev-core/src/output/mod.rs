//! Periodic textual emitters.
//!
//! Emitters are driven by trace time, never wall-clock: [`Emitter::update`]
//! only writes once at least the configured period has elapsed since the
//! emitter's last write. [`Emitter::emit`] writes unconditionally.

pub mod allocation_map;
pub mod graph;

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::ReplayError;
use crate::model::AddrSpaceModel;
use crate::trace::Timestamp;

pub use allocation_map::AllocationMapOutput;
pub use graph::GraphOutput;

/// Everything an emitter may read for one emission.
pub struct OutputContext<'a> {
    pub timestamp: Timestamp,
    /// Whole address-space sampler.
    pub addr_space: &'a dyn AddrSpaceModel,
    /// Allocator state.
    pub alloc_state: &'a dyn AddrSpaceModel,
    /// Cumulative swept bytes.
    pub swept: u64,
}

/// Last-emission bookkeeping for one emitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    period_ms: u64,
    last_emission_ms: Option<u64>,
}

impl RateLimiter {
    #[must_use]
    pub const fn new(period_ms: u64) -> Self {
        Self {
            period_ms,
            last_emission_ms: None,
        }
    }

    /// Returns true and records `now` if an emission is due.
    pub fn admit(&mut self, now: Timestamp) -> bool {
        let now_ms = now.as_ms();
        let due = self
            .last_emission_ms
            .is_none_or(|last| now_ms.saturating_sub(last) >= self.period_ms);
        if due {
            self.last_emission_ms = Some(now_ms);
        }
        due
    }

    /// Record an unconditional emission.
    pub fn mark(&mut self, now: Timestamp) {
        self.last_emission_ms = Some(now.as_ms());
    }

    #[must_use]
    pub const fn last_emission_ms(&self) -> Option<u64> {
        self.last_emission_ms
    }
}

pub trait Emitter {
    /// Emit if the rate limit allows.
    fn update(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError>;

    /// Emit now, regardless of the rate limit.
    fn emit(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError>;

    fn flush(&mut self) -> Result<(), ReplayError> {
        Ok(())
    }
}

/// Emitters that are also reuse subscribers are shared with the model.
impl<T: Emitter> Emitter for Rc<RefCell<T>> {
    fn update(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        self.borrow_mut().update(ctx)
    }

    fn emit(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        self.borrow_mut().emit(ctx)
    }

    fn flush(&mut self) -> Result<(), ReplayError> {
        self.borrow_mut().flush()
    }
}

/// Fans every call out to each child, in insertion order.
#[derive(Default)]
pub struct CompositeOutput {
    outputs: Vec<Box<dyn Emitter>>,
}

impl CompositeOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, output: Box<dyn Emitter>) {
        self.outputs.push(output);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl Emitter for CompositeOutput {
    fn update(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        for output in &mut self.outputs {
            output.update(ctx)?;
        }
        Ok(())
    }

    fn emit(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
        for output in &mut self.outputs {
            output.emit(ctx)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ReplayError> {
        for output in &mut self.outputs {
            output.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MappingAddrSpaceModel;

    #[derive(Default)]
    struct Counter {
        limiter: Option<RateLimiter>,
        emitted: Vec<u64>,
    }

    impl Emitter for Counter {
        fn update(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
            let limiter = self.limiter.get_or_insert(RateLimiter::new(100));
            if limiter.admit(ctx.timestamp) {
                self.emitted.push(ctx.timestamp.as_ms());
            }
            Ok(())
        }

        fn emit(&mut self, ctx: &OutputContext<'_>) -> Result<(), ReplayError> {
            self.emitted.push(ctx.timestamp.as_ms());
            Ok(())
        }
    }

    #[test]
    fn rate_limiter_admits_first_and_after_period() {
        let mut limiter = RateLimiter::new(100);
        assert!(limiter.admit(Timestamp::from_ms(5)));
        assert!(!limiter.admit(Timestamp::from_ms(50)));
        assert!(!limiter.admit(Timestamp::from_ms(104)));
        assert!(limiter.admit(Timestamp::from_ms(105)));
        assert_eq!(limiter.last_emission_ms(), Some(105));
        limiter.mark(Timestamp::from_ms(150));
        assert!(!limiter.admit(Timestamp::from_ms(200)));
    }

    #[test]
    fn zero_period_admits_everything() {
        let mut limiter = RateLimiter::new(0);
        assert!(limiter.admit(Timestamp(0)));
        assert!(limiter.admit(Timestamp(0)));
    }

    #[test]
    fn composite_fans_out_to_shared_children() {
        let model = MappingAddrSpaceModel::new();
        let a = Rc::new(RefCell::new(Counter::default()));
        let b = Rc::new(RefCell::new(Counter::default()));
        let mut composite = CompositeOutput::new();
        composite.push(Box::new(a.clone()));
        composite.push(Box::new(b.clone()));
        assert_eq!(composite.len(), 2);

        for ms in [0, 20, 120, 130] {
            let ctx = OutputContext {
                timestamp: Timestamp::from_ms(ms),
                addr_space: &model,
                alloc_state: &model,
                swept: 0,
            };
            composite.update(&ctx).unwrap();
        }
        let ctx = OutputContext {
            timestamp: Timestamp::from_ms(140),
            addr_space: &model,
            alloc_state: &model,
            swept: 0,
        };
        composite.emit(&ctx).unwrap();

        assert_eq!(a.borrow().emitted, vec![0, 120, 140]);
        assert_eq!(b.borrow().emitted, vec![0, 120, 140]);
    }
}
