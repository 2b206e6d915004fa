//! Replay configuration.
//!
//! The revoker is chosen once at startup:
//! - `naive`: sweep exactly the freed bytes inside each reused range.
//! - `compacting`: on every reuse, sweep all outstanding freed memory in one batch.
//! - `account`: skip interval tracking entirely and only keep byte totals.
//!   Assumes a clean trace (no overlapping allocations, no misfrees).

use crate::error::ConfigError;

/// Revocation strategy selection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RevokerKind {
    #[default]
    Naive,
    Compacting,
    /// Fast accounting-only path with no revocation modelling.
    Accounting,
}

impl RevokerKind {
    /// Parse a revoker name (case-insensitive).
    pub fn from_str_loose(s: &str) -> Result<Self, ConfigError> {
        match s.to_ascii_lowercase().as_str() {
            "naive" | "naivesweepingrevoker" | "default" => Ok(Self::Naive),
            "compacting" | "compactingsweepingrevoker" | "compact" => Ok(Self::Compacting),
            "account" | "accounting" | "fast" => Ok(Self::Accounting),
            _ => Err(ConfigError::UnknownRevoker(s.to_string())),
        }
    }

    /// Returns true when the allocator state is tracked as intervals.
    #[must_use]
    pub const fn tracks_intervals(self) -> bool {
        !matches!(self, Self::Accounting)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::Compacting => "compacting",
            Self::Accounting => "account",
        }
    }
}

/// Default emission period in simulated milliseconds.
pub const DEFAULT_EMIT_PERIOD_MS: u64 = 100;

/// Default gap below which neighbouring occupied intervals share a pool.
pub const DEFAULT_POOL_GAP_THRESHOLD: u64 = 0x1000;

/// Default number of chunks rendered per pool.
pub const DEFAULT_CHUNKS_PER_POOL: usize = 60;

/// Default allocated coverage for a chunk to render as allocated.
pub const DEFAULT_ALLOCATED_FRACTION: f64 = 0.80;

/// Integer scale for allocated-fraction comparisons (parts per billion).
pub const FRACTION_SCALE: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayConfig {
    pub revoker: RevokerKind,
    /// Maximum number of intervals one sweep may submit.
    pub sweep_capacity: usize,
    pub emit_period_ms: u64,
    pub pool_gap_threshold: u64,
    pub chunks_per_pool: usize,
    pub allocated_fraction: f64,
}

impl ReplayConfig {
    #[must_use]
    pub fn new(revoker: RevokerKind) -> Self {
        Self {
            revoker,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_capacity == 0 {
            return Err(ConfigError::ZeroSweepCapacity);
        }
        if self.chunks_per_pool == 0 {
            return Err(ConfigError::ZeroChunks);
        }
        if !(0.0..=1.0).contains(&self.allocated_fraction) {
            return Err(ConfigError::FractionOutOfRange(self.allocated_fraction));
        }
        Ok(())
    }

    /// Allocated fraction in parts per [`FRACTION_SCALE`], for exact
    /// integer comparisons.
    #[must_use]
    pub fn allocated_fraction_ppb(&self) -> u64 {
        (self.allocated_fraction * FRACTION_SCALE as f64).round() as u64
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            revoker: RevokerKind::default(),
            sweep_capacity: usize::MAX,
            emit_period_ms: DEFAULT_EMIT_PERIOD_MS,
            pool_gap_threshold: DEFAULT_POOL_GAP_THRESHOLD,
            chunks_per_pool: DEFAULT_CHUNKS_PER_POOL,
            allocated_fraction: DEFAULT_ALLOCATED_FRACTION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_revoker_kinds() {
        assert_eq!(RevokerKind::from_str_loose("naive"), Ok(RevokerKind::Naive));
        assert_eq!(
            RevokerKind::from_str_loose("NaiveSweepingRevoker"),
            Ok(RevokerKind::Naive)
        );
        assert_eq!(
            RevokerKind::from_str_loose("Compacting"),
            Ok(RevokerKind::Compacting)
        );
        assert_eq!(
            RevokerKind::from_str_loose("account"),
            Ok(RevokerKind::Accounting)
        );
        assert_eq!(
            RevokerKind::from_str_loose("bogus"),
            Err(ConfigError::UnknownRevoker("bogus".to_string()))
        );
    }

    #[test]
    fn defaults() {
        let cfg = ReplayConfig::default();
        assert_eq!(cfg.revoker, RevokerKind::Naive);
        assert_eq!(cfg.emit_period_ms, 100);
        assert_eq!(cfg.pool_gap_threshold, 4096);
        assert_eq!(cfg.chunks_per_pool, 60);
        assert_eq!(cfg.allocated_fraction_ppb(), 800_000_000);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = ReplayConfig::default();
        cfg.sweep_capacity = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroSweepCapacity));

        let mut cfg = ReplayConfig::default();
        cfg.chunks_per_pool = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroChunks));

        let mut cfg = ReplayConfig::default();
        cfg.allocated_fraction = 1.5;
        assert_eq!(cfg.validate(), Err(ConfigError::FractionOutOfRange(1.5)));
    }

    #[test]
    fn fraction_keeps_sub_basis_point_precision() {
        let mut cfg = ReplayConfig::default();
        cfg.allocated_fraction = 0.80005;
        assert_eq!(cfg.allocated_fraction_ppb(), 800_050_000);
        cfg.allocated_fraction = 0.8001;
        assert_eq!(cfg.allocated_fraction_ppb(), 800_100_000);
        cfg.allocated_fraction = 1.0;
        assert_eq!(cfg.allocated_fraction_ppb(), FRACTION_SCALE);
    }

    #[test]
    fn accounting_does_not_track_intervals() {
        assert!(RevokerKind::Naive.tracks_intervals());
        assert!(RevokerKind::Compacting.tracks_intervals());
        assert!(!RevokerKind::Accounting.tracks_intervals());
    }
}
