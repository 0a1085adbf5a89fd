//! Per-day, per-source watt-hour counters.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use dashmap::DashMap;
use energy_client::EnergySource;
use rust_decimal::{prelude::ToPrimitive, Decimal};

use crate::stores::{CounterStore, StorageError};

pub type CounterKey = (NaiveDate, EnergySource);

/// Convert kWh to whole watt-hours, dropping any fraction of a watt-hour.
///
/// Returns `None` for negative input or values beyond `u64`.
pub fn kwh_to_whole_wh(kwh: Decimal) -> Option<u64> {
    kwh.checked_mul(Decimal::ONE_THOUSAND)?.trunc().to_u64()
}

pub fn wh_to_kwh(wh: u64) -> Decimal {
    Decimal::from(wh) / Decimal::ONE_THOUSAND
}

/// In-process counter store. Each key owns an `AtomicU64`, so increments on
/// one key never block another key and never lose an update.
#[derive(Debug, Default)]
pub struct AtomicCounterStore {
    counters: DashMap<CounterKey, AtomicU64>,
}

impl AtomicCounterStore {
    pub fn add(&self, date: NaiveDate, source: EnergySource, wh: u64) -> u64 {
        let key = (date, source);

        // Existing keys only need the shard read lock.
        if let Some(counter) = self.counters.get(&key) {
            return counter.fetch_add(wh, Ordering::AcqRel) + wh;
        }

        self.counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(wh, Ordering::AcqRel)
            + wh
    }

    pub fn total(&self, date: NaiveDate, source: EnergySource) -> u64 {
        self.counters
            .get(&(date, source))
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl CounterStore for AtomicCounterStore {
    async fn increment(&self, date: NaiveDate, source: EnergySource, amount_wh: u64) -> Result<u64, StorageError> {
        Ok(self.add(date, source, amount_wh))
    }

    async fn get_total(&self, date: NaiveDate, source: EnergySource) -> Result<u64, StorageError> {
        Ok(self.total(date, source))
    }
}
