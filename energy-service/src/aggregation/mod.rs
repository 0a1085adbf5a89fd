//! City, district and hourly statistics computed at request time.
//!
//! [`StatsEngine`] resolves sensor sets from the catalog and lays out time
//! windows; the number crunching sits behind [`AggregationStrategy`] so the
//! per-request scan in [`scan`] can be swapped for a pre-aggregated source.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use energy_client::{DistrictProfile, Sensor};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

use crate::{
    clock::{date_in, local_to_utc, Clock, ZoneSettings},
    stores::{Catalog, StorageError},
};

pub mod scan;

pub use scan::ScanAggregator;

pub const CITY_SCOPE: &str = "All Districts";

/// Round half-up (away from zero) and pin the scale, so 2 prints as 2.00.
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(dp);
    rounded
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub scope: String,
    pub total_kwh: Decimal,
    pub solar_ratio_percent: Decimal,
    pub sensor_count: usize,
    pub active_sensor_count: usize,
    pub avg_voltage: Decimal,
}

impl StatsSnapshot {
    pub fn empty(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            total_kwh: round_half_up(Decimal::ZERO, 2),
            solar_ratio_percent: round_half_up(Decimal::ZERO, 2),
            sensor_count: 0,
            active_sensor_count: 0,
            avg_voltage: round_half_up(Decimal::ZERO, 2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyBucket {
    pub hour: u32,
    pub time_label: String,
    pub total_kwh: Decimal,
    pub solar_kwh: Decimal,
    pub grid_kwh: Decimal,
    pub reading_count: u64,
}

impl HourlyBucket {
    pub fn empty(hour: u32) -> Self {
        Self {
            hour,
            time_label: time_label(hour),
            total_kwh: round_half_up(Decimal::ZERO, 2),
            solar_kwh: round_half_up(Decimal::ZERO, 2),
            grid_kwh: round_half_up(Decimal::ZERO, 2),
            reading_count: 0,
        }
    }
}

fn time_label(hour: u32) -> String {
    format!("{hour:02}:00")
}

/// One local hour of a day, as an inclusive instant range.
///
/// Readings are stored under their counter-zone event date, which need not
/// match the presentation-zone day the window belongs to. `first_event_date`
/// and `last_event_date` are the counter-zone dates of `start` and `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourWindow {
    pub hour: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub first_event_date: NaiveDate,
    pub last_event_date: NaiveDate,
}

impl HourWindow {
    pub fn time_label(&self) -> String {
        time_label(self.hour)
    }

    /// Distinct event dates a reading inside the window can carry.
    pub fn event_dates(&self) -> impl Iterator<Item = NaiveDate> {
        let last = (self.last_event_date != self.first_event_date).then_some(self.last_event_date);
        std::iter::once(self.first_event_date).chain(last)
    }
}

#[async_trait::async_trait]
pub trait AggregationStrategy: Send + Sync {
    /// Snapshot over `sensors` for `day`. An empty set yields
    /// [`StatsSnapshot::empty`].
    async fn scope_stats(&self, scope: &str, sensors: &[Sensor], day: NaiveDate) -> Result<StatsSnapshot, StorageError>;

    /// One bucket per window, in window order.
    async fn hourly_buckets(&self, sensors: &[Sensor], windows: &[HourWindow]) -> Result<Vec<HourlyBucket>, StorageError>;
}

pub struct StatsEngine {
    catalog: Arc<dyn Catalog>,
    strategy: Arc<dyn AggregationStrategy>,
    clock: Arc<dyn Clock>,
    zones: ZoneSettings,
}

impl StatsEngine {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        strategy: Arc<dyn AggregationStrategy>,
        clock: Arc<dyn Clock>,
        zones: ZoneSettings,
    ) -> Self {
        Self {
            catalog,
            strategy,
            clock,
            zones,
        }
    }

    /// "Today" for daily statistics, matching readings' event dates.
    pub fn today(&self) -> NaiveDate {
        date_in(self.zones.counter_zone, self.clock.now())
    }

    pub async fn compute_scope_stats(
        &self,
        scope: &str,
        sensors: &[Sensor],
        today: NaiveDate,
    ) -> Result<StatsSnapshot, StorageError> {
        if sensors.is_empty() {
            return Ok(StatsSnapshot::empty(scope));
        }
        self.strategy.scope_stats(scope, sensors, today).await
    }

    pub async fn city_stats(&self) -> Result<StatsSnapshot, StorageError> {
        let sensors = self.catalog.find_all_sensors().await?;
        self.compute_scope_stats(CITY_SCOPE, &sensors, self.today()).await
    }

    /// Unknown or blank district names give the empty snapshot.
    pub async fn district_stats(&self, district: &str) -> Result<StatsSnapshot, StorageError> {
        let sensors = if district.trim().is_empty() {
            Vec::new()
        } else {
            self.catalog.find_by_district(district).await?
        };
        self.compute_scope_stats(district, &sensors, self.today()).await
    }

    pub async fn district_profiles(&self) -> Result<Vec<DistrictProfile>, StorageError> {
        self.catalog.find_all_district_profiles().await
    }

    pub async fn district_profile(&self, name: &str) -> Result<Option<DistrictProfile>, StorageError> {
        Ok(self
            .catalog
            .find_all_district_profiles()
            .await?
            .into_iter()
            .find(|p| p.name == name))
    }

    /// Bucket hours for `date` in the presentation zone: up to and including
    /// the current hour when `date` is today there, otherwise all 24.
    fn hour_bound(&self, date: NaiveDate) -> u32 {
        let now_local = self.clock.now().with_timezone(&self.zones.presentation_zone);
        if date == now_local.date_naive() {
            now_local.hour() + 1
        } else {
            24
        }
    }

    /// Windows for the bucket hours of `date` that exist on the local clock.
    ///
    /// A window runs from its hour's start up to just before the next
    /// existing hour, so a skipped hour (DST spring-forward) has no window and
    /// a repeated hour (fall-back) spans both passes.
    pub fn hour_windows(&self, date: NaiveDate) -> Vec<HourWindow> {
        let zone = self.zones.presentation_zone;
        let starts: Vec<Option<DateTime<Utc>>> = (0..24)
            .map(|hour| date.and_hms_opt(hour, 0, 0).and_then(|local| local_to_utc(zone, local)))
            .chain(std::iter::once(
                date.succ_opt()
                    .and_then(|next| next.and_hms_opt(0, 0, 0))
                    .and_then(|local| local_to_utc(zone, local)),
            ))
            .collect();

        (0..self.hour_bound(date))
            .filter_map(|hour| {
                let start = starts[hour as usize]?;
                let next = starts[hour as usize + 1..]
                    .iter()
                    .flatten()
                    .next()
                    .copied()
                    .unwrap_or(start + Duration::hours(1));
                // Inclusive through the last instant before the next hour.
                let end = next - Duration::nanoseconds(1);
                Some(HourWindow {
                    hour,
                    start,
                    end,
                    first_event_date: date_in(self.zones.counter_zone, start),
                    last_event_date: date_in(self.zones.counter_zone, end),
                })
            })
            .collect()
    }

    /// One bucket per bucket hour; hours missing from the local clock are
    /// empty.
    pub async fn compute_hourly_stats(&self, date: NaiveDate) -> Result<Vec<HourlyBucket>, StorageError> {
        let sensors = self.catalog.find_all_sensors().await?;
        let windows = self.hour_windows(date);
        let mut computed = self.strategy.hourly_buckets(&sensors, &windows).await?.into_iter().peekable();

        let mut out = Vec::new();
        for hour in 0..self.hour_bound(date) {
            match computed.next_if(|b| b.hour == hour) {
                Some(bucket) => out.push(bucket),
                None => out.push(HourlyBucket::empty(hour)),
            }
        }
        Ok(out)
    }

    pub async fn hourly_stats(&self, date: NaiveDate) -> Result<Vec<HourlyBucket>, StorageError> {
        self.compute_hourly_stats(date).await
    }

    pub async fn hourly_stats_today(&self) -> Result<Vec<HourlyBucket>, StorageError> {
        let today = date_in(self.zones.presentation_zone, self.clock.now());
        self.compute_hourly_stats(today).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::FixedClock, stores::MemoryCatalog};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    struct NeverCalled;

    #[async_trait::async_trait]
    impl AggregationStrategy for NeverCalled {
        async fn scope_stats(&self, _: &str, _: &[Sensor], _: NaiveDate) -> Result<StatsSnapshot, StorageError> {
            Err(StorageError::new("strategy should not run for an empty set"))
        }

        async fn hourly_buckets(&self, _: &[Sensor], windows: &[HourWindow]) -> Result<Vec<HourlyBucket>, StorageError> {
            Ok(windows.iter().map(|w| HourlyBucket::empty(w.hour)).collect())
        }
    }

    fn engine(now: DateTime<Utc>) -> StatsEngine {
        engine_in(now, ZoneSettings::default())
    }

    fn engine_in(now: DateTime<Utc>, zones: ZoneSettings) -> StatsEngine {
        StatsEngine::new(
            Arc::new(MemoryCatalog::default()),
            Arc::new(NeverCalled),
            Arc::new(FixedClock(now)),
            zones,
        )
    }

    fn prague() -> ZoneSettings {
        ZoneSettings {
            counter_zone: chrono_tz::Europe::Prague,
            presentation_zone: chrono_tz::Europe::Prague,
        }
    }

    #[test]
    fn round_half_up_pins_scale() {
        assert_eq!(round_half_up(dec!(2.010), 2).to_string(), "2.01");
        assert_eq!(round_half_up(dec!(1.005), 2).to_string(), "1.01");
        assert_eq!(round_half_up(dec!(1.004), 2).to_string(), "1.00");
        assert_eq!(round_half_up(Decimal::ZERO, 2).to_string(), "0.00");
    }

    #[tokio::test]
    async fn empty_catalog_gives_zero_snapshot() {
        let e = engine(Utc.with_ymd_and_hms(2024, 10, 1, 5, 0, 0).unwrap());

        let city = e.city_stats().await.unwrap();
        assert_eq!(city, StatsSnapshot::empty(CITY_SCOPE));
        assert_eq!(city.total_kwh, Decimal::ZERO);
        assert_eq!(city.sensor_count, 0);

        let district = e.district_stats("Nowhere").await.unwrap();
        assert_eq!(district.scope, "Nowhere");
        assert_eq!(district.avg_voltage, Decimal::ZERO);
        assert_eq!(e.district_stats("  ").await.unwrap().sensor_count, 0);
    }

    #[tokio::test]
    async fn hourly_for_today_stops_at_current_hour() {
        // 05:30 UTC is 12:30 in Jakarta.
        let e = engine(Utc.with_ymd_and_hms(2024, 10, 1, 5, 30, 0).unwrap());
        let today = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();

        let buckets = e.compute_hourly_stats(today).await.unwrap();
        assert_eq!(buckets.len(), 13);
        assert_eq!(buckets.last().unwrap().time_label, "12:00");

        assert_eq!(e.hourly_stats_today().await.unwrap().len(), 13);
    }

    #[tokio::test]
    async fn hourly_for_other_dates_has_full_day() {
        let e = engine(Utc.with_ymd_and_hms(2024, 10, 1, 5, 30, 0).unwrap());

        let past = e
            .compute_hourly_stats(NaiveDate::from_ymd_opt(2024, 9, 30).unwrap())
            .await
            .unwrap();
        assert_eq!(past.len(), 24);
        assert_eq!(past[0].time_label, "00:00");
        assert_eq!(past[23].time_label, "23:00");

        let future = e
            .compute_hourly_stats(NaiveDate::from_ymd_opt(2024, 10, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(future.len(), 24);
    }

    #[test]
    fn hour_windows_are_laid_out_in_presentation_zone() {
        let e = engine(Utc.with_ymd_and_hms(2024, 10, 5, 0, 0, 0).unwrap());
        let windows = e.hour_windows(NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());

        // Jakarta midnight is 17:00 UTC the previous day.
        assert_eq!(windows[0].start, Utc.with_ymd_and_hms(2024, 9, 30, 17, 0, 0).unwrap());
        assert!(windows[0].end < windows[1].start);
        assert_eq!(windows[1].start - windows[0].end, Duration::nanoseconds(1));
        assert_eq!(windows[0].first_event_date, NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert_eq!(windows[0].event_dates().count(), 1);
    }

    #[tokio::test]
    async fn skipped_local_hour_gets_an_empty_bucket_and_no_window() {
        let e = engine_in(Utc.with_ymd_and_hms(2024, 4, 2, 12, 0, 0).unwrap(), prague());
        let day = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();

        let windows = e.hour_windows(day);
        assert_eq!(windows.len(), 23);
        assert!(windows.iter().all(|w| w.hour != 2));
        // 01:00 CET runs straight into 03:00 CEST, one real hour later.
        assert_eq!(windows[1].hour, 1);
        assert_eq!(windows[1].end - windows[1].start, Duration::hours(1) - Duration::nanoseconds(1));
        assert_eq!(windows[2].start - windows[1].end, Duration::nanoseconds(1));

        let buckets = e.compute_hourly_stats(day).await.unwrap();
        assert_eq!(buckets.len(), 24);
        assert_eq!(buckets[2], HourlyBucket::empty(2));
        assert_eq!(buckets[3].time_label, "03:00");
    }

    #[test]
    fn repeated_local_hour_window_covers_both_passes() {
        let e = engine_in(Utc.with_ymd_and_hms(2024, 11, 1, 12, 0, 0).unwrap(), prague());
        let windows = e.hour_windows(NaiveDate::from_ymd_opt(2024, 10, 27).unwrap());

        assert_eq!(windows.len(), 24);
        assert_eq!(windows[2].start, Utc.with_ymd_and_hms(2024, 10, 27, 0, 0, 0).unwrap());
        assert_eq!(windows[3].start, Utc.with_ymd_and_hms(2024, 10, 27, 2, 0, 0).unwrap());
        assert_eq!(windows[2].end - windows[2].start, Duration::hours(2) - Duration::nanoseconds(1));
    }

    #[test]
    fn windows_carry_counter_zone_event_dates() {
        let zones = ZoneSettings {
            counter_zone: chrono_tz::Asia::Jakarta,
            presentation_zone: chrono_tz::UTC,
        };
        let e = engine_in(Utc.with_ymd_and_hms(2024, 10, 5, 0, 0, 0).unwrap(), zones);
        let windows = e.hour_windows(NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());

        let oct1 = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        let oct2 = NaiveDate::from_ymd_opt(2024, 10, 2).unwrap();
        // 16:00 UTC is 23:00 in Jakarta; 17:00 UTC is already the next day there.
        assert_eq!(windows[16].event_dates().collect::<Vec<_>>(), vec![oct1]);
        assert_eq!(windows[17].event_dates().collect::<Vec<_>>(), vec![oct2]);
        assert_eq!(windows[20].first_event_date, oct2);
    }
}
