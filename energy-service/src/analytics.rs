//! Cost, savings and emission figures derived from the daily counters.

use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use energy_client::EnergySource;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::Serialize;

use crate::{
    clock::{date_in, Clock},
    counters::wh_to_kwh,
    stores::{CounterStore, StorageError},
};

/// Static prices (currency per kWh) and the grid emission factor (kg CO2 per kWh).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tariff {
    pub grid_price_per_kwh: Decimal,
    pub solar_price_per_kwh: Decimal,
    pub emission_factor_kg_per_kwh: Decimal,
}

impl Default for Tariff {
    fn default() -> Self {
        Self {
            grid_price_per_kwh: Decimal::from(1500),
            solar_price_per_kwh: Decimal::ZERO,
            emission_factor_kg_per_kwh: Decimal::new(8, 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DailyTotals {
    pub date: NaiveDate,
    pub grid_kwh: Decimal,
    pub solar_kwh: Decimal,
}

impl DailyTotals {
    /// What solar avoided paying at grid price, floored at zero.
    pub fn savings(&self, tariff: &Tariff) -> i64 {
        let cost_without_solar = (self.grid_kwh + self.solar_kwh) * tariff.grid_price_per_kwh;
        let actual_cost = self.grid_kwh * tariff.grid_price_per_kwh + self.solar_kwh * tariff.solar_price_per_kwh;
        round_to_whole((cost_without_solar - actual_cost).max(Decimal::ZERO))
    }

    pub fn grid_cost(&self, tariff: &Tariff) -> i64 {
        round_to_whole(self.grid_kwh * tariff.grid_price_per_kwh)
    }

    pub fn emissions_kg(&self, tariff: &Tariff) -> f64 {
        (self.grid_kwh * tariff.emission_factor_kg_per_kwh)
            .to_f64()
            .unwrap_or(f64::MAX)
    }
}

fn round_to_whole(d: Decimal) -> i64 {
    let rounded = d.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or(if rounded.is_sign_negative() { i64::MIN } else { i64::MAX })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsSnapshot {
    pub totals: DailyTotals,
    pub savings: i64,
    pub grid_cost: i64,
    pub emissions_kg: f64,
}

pub struct EnergyAnalytics {
    counters: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    zone: Tz,
    tariff: Tariff,
}

impl EnergyAnalytics {
    pub fn new(counters: Arc<dyn CounterStore>, clock: Arc<dyn Clock>, zone: Tz, tariff: Tariff) -> Self {
        Self {
            counters,
            clock,
            zone,
            tariff,
        }
    }

    pub fn tariff(&self) -> &Tariff {
        &self.tariff
    }

    /// Today's date in the counter zone.
    pub fn today(&self) -> NaiveDate {
        date_in(self.zone, self.clock.now())
    }

    pub async fn daily_totals(&self, date: NaiveDate) -> Result<DailyTotals, StorageError> {
        let grid_wh = self.counters.get_total(date, EnergySource::Grid).await?;
        let solar_wh = self.counters.get_total(date, EnergySource::Solar).await?;
        Ok(DailyTotals {
            date,
            grid_kwh: wh_to_kwh(grid_wh),
            solar_kwh: wh_to_kwh(solar_wh),
        })
    }

    pub async fn today_savings(&self) -> Result<i64, StorageError> {
        Ok(self.daily_totals(self.today()).await?.savings(&self.tariff))
    }

    pub async fn realtime_grid_cost(&self) -> Result<i64, StorageError> {
        Ok(self.daily_totals(self.today()).await?.grid_cost(&self.tariff))
    }

    pub async fn realtime_emissions_kg(&self) -> Result<f64, StorageError> {
        Ok(self.daily_totals(self.today()).await?.emissions_kg(&self.tariff))
    }

    /// All of today's figures from a single pair of counter reads.
    pub async fn today_snapshot(&self) -> Result<AnalyticsSnapshot, StorageError> {
        let totals = self.daily_totals(self.today()).await?;
        Ok(AnalyticsSnapshot {
            totals,
            savings: totals.savings(&self.tariff),
            grid_cost: totals.grid_cost(&self.tariff),
            emissions_kg: totals.emissions_kg(&self.tariff),
        })
    }
}
