//! Accounting-only model.
//!
//! Keeps running totals and a start-address to size lookup, nothing else.
//! There are no intervals, so overlapping allocations and misfrees are not
//! detected; use it only on traces known to be clean.

use std::collections::HashMap;

use crate::error::ReplayError;
use crate::model::{AddrSpaceModel, Aggregates};
use crate::trace::Timestamp;

#[derive(Debug, Clone, Default)]
pub struct AccountingAddrSpaceModel {
    va2sz: HashMap<u64, u64>,
    totals: Aggregates,
}

impl AccountingAddrSpaceModel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocations currently tracked.
    #[must_use]
    pub fn live_allocations(&self) -> usize {
        self.va2sz.len()
    }

    fn allocate(&mut self, begin: u64, end: u64) {
        let size = end.saturating_sub(begin);
        if let Some(replaced) = self.va2sz.insert(begin, size) {
            self.totals.allocated_size = self.totals.allocated_size.saturating_sub(replaced);
        }
        self.totals.allocated_size = self.totals.allocated_size.saturating_add(size);
    }

    fn free(&mut self, begin: u64) {
        if let Some(size) = self.va2sz.remove(&begin) {
            self.totals.allocated_size = self.totals.allocated_size.saturating_sub(size);
        }
    }
}

impl AddrSpaceModel for AccountingAddrSpaceModel {
    fn name(&self) -> &'static str {
        "accounting"
    }

    fn aggregates(&self) -> Aggregates {
        self.totals
    }

    fn allocated(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.allocate(begin, end);
        Ok(())
    }

    fn reallocated(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        old_begin: u64,
        new_begin: u64,
        new_end: u64,
    ) -> Result<(), ReplayError> {
        self.free(old_begin);
        self.allocate(new_begin, new_end);
        Ok(())
    }

    fn freed(&mut self, _now: Timestamp, _stack: &str, begin: u64) -> Result<(), ReplayError> {
        self.free(begin);
        Ok(())
    }

    fn mapped(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.totals.mapped_size = self
            .totals
            .mapped_size
            .saturating_add(end.saturating_sub(begin));
        Ok(())
    }

    fn unmapped(
        &mut self,
        _now: Timestamp,
        _stack: &str,
        begin: u64,
        end: u64,
    ) -> Result<(), ReplayError> {
        self.totals.mapped_size = self
            .totals
            .mapped_size
            .saturating_sub(end.saturating_sub(begin));
        Ok(())
    }

    fn size_measured(&mut self, bytes: u64) {
        self.totals.size = bytes;
    }

    fn sweep_size_measured(&mut self, bytes: u64) {
        self.totals.sweep_size = bytes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Timestamp = Timestamp(0);

    #[test]
    fn alloc_free_realloc_totals() {
        let mut model = AccountingAddrSpaceModel::new();
        model.allocated(T, "", 0, 100).unwrap();
        model.allocated(T, "", 200, 232).unwrap();
        assert_eq!(model.aggregates().allocated_size, 132);

        model.reallocated(T, "", 0, 400, 450).unwrap();
        assert_eq!(model.aggregates().allocated_size, 82);

        model.freed(T, "", 200).unwrap();
        assert_eq!(model.aggregates().allocated_size, 50);
        assert_eq!(model.live_allocations(), 1);
    }

    #[test]
    fn unknown_free_is_ignored() {
        let mut model = AccountingAddrSpaceModel::new();
        model.allocated(T, "", 0, 16).unwrap();
        model.freed(T, "", 8).unwrap();
        assert_eq!(model.aggregates().allocated_size, 16);
    }

    #[test]
    fn reallocating_same_start_replaces_size() {
        let mut model = AccountingAddrSpaceModel::new();
        model.allocated(T, "", 0, 16).unwrap();
        model.allocated(T, "", 0, 64).unwrap();
        assert_eq!(model.aggregates().allocated_size, 64);
        assert_eq!(model.live_allocations(), 1);
    }

    #[test]
    fn mapping_totals_saturate() {
        let mut model = AccountingAddrSpaceModel::new();
        model.mapped(T, "", 0, 0x1000).unwrap();
        model.unmapped(T, "", 0, 0x3000).unwrap();
        assert_eq!(model.aggregates().mapped_size, 0);
    }

    #[test]
    fn no_interval_surface() {
        let mut model = AccountingAddrSpaceModel::new();
        model.allocated(T, "", 0, 16).unwrap();
        assert!(model.coalesced_intervals().is_empty());
        assert!(model.drain_lifecycle_logs().is_empty());
    }
}
