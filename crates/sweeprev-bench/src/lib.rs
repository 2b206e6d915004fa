//! Deterministic workloads shared by the sweeprev benchmarks.

use sweeprev_core::{TimedEvent, TraceEvent};

/// xorshift64* generator; benchmarks must not depend on an RNG crate's
/// stream stability.
#[derive(Clone, Copy, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform value in `low..=high_inclusive`.
    pub fn gen_range(&mut self, low: u64, high_inclusive: u64) -> u64 {
        let span = high_inclusive - low + 1;
        low + self.next_u64() % span
    }
}

/// Allocation churn over an `arena`-byte heap: 16-byte aligned allocations
/// with frees and reallocations, one event per simulated 100us.
///
/// Frees only target live allocations and the trace records no
/// revocations, so any revoker replays it without a fatal error.
#[must_use]
pub fn churn_trace(seed: u64, steps: usize, arena: u64) -> Vec<TimedEvent> {
    let mut rng = XorShift64::new(seed);
    let mut live: Vec<u64> = Vec::new();
    let mut events = Vec::with_capacity(steps);
    let slots = arena / 16;

    for step in 0..steps as u64 {
        let roll = rng.gen_range(0, 9);
        let event = if roll < 5 || live.is_empty() {
            let begin = rng.gen_range(0, slots - 1) * 16;
            live.push(begin);
            TraceEvent::Allocated {
                stack: "malloc".into(),
                begin,
                end: begin + rng.gen_range(1, 64) * 16,
            }
        } else if roll < 8 {
            let idx = rng.gen_range(0, live.len() as u64 - 1) as usize;
            TraceEvent::Freed {
                stack: "free".into(),
                begin: live.swap_remove(idx),
            }
        } else {
            let idx = rng.gen_range(0, live.len() as u64 - 1) as usize;
            let old_begin = live.swap_remove(idx);
            let new_begin = rng.gen_range(0, slots - 1) * 16;
            live.push(new_begin);
            TraceEvent::Reallocated {
                stack: "realloc".into(),
                old_begin,
                new_begin,
                new_end: new_begin + rng.gen_range(1, 64) * 16,
            }
        };
        events.push(TimedEvent::new(step * 100_000, event));
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn churn_trace_is_deterministic_and_ordered() {
        let a = churn_trace(3, 500, 1 << 20);
        assert_eq!(a, churn_trace(3, 500, 1 << 20));
        assert!(a.windows(2).all(|w| w[0].timestamp_ns <= w[1].timestamp_ns));
        assert!(matches!(a[0].event, TraceEvent::Allocated { .. }));
    }
}
