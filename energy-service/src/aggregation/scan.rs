//! Full-scan strategy: every request walks the reading store per sensor.
//!
//! Hourly stats cost O(sensors x hours x readings per window) store calls and
//! rows, which is fine for a moderate fleet.

use std::sync::Arc;

use chrono::NaiveDate;
use energy_client::Sensor;
use futures::future::try_join_all;
use rust_decimal::Decimal;

use super::{round_half_up, AggregationStrategy, HourWindow, HourlyBucket, StatsSnapshot};
use crate::stores::{ReadingStore, StorageError};

pub struct ScanAggregator {
    readings: Arc<dyn ReadingStore>,
}

impl ScanAggregator {
    pub fn new(readings: Arc<dyn ReadingStore>) -> Self {
        Self { readings }
    }

    async fn sensor_day(&self, sensor: &Sensor, day: NaiveDate) -> Result<(Decimal, Option<Decimal>), StorageError> {
        let total = self.readings.daily_total(&sensor.sensor_id, day).await?;
        let voltage = self.readings.average_voltage(&sensor.sensor_id, day).await?;
        Ok((total, voltage))
    }

    async fn bucket(&self, sensors: &[Sensor], window: &HourWindow) -> Result<HourlyBucket, StorageError> {
        let mut total = Decimal::ZERO;
        let mut solar = Decimal::ZERO;
        let mut grid = Decimal::ZERO;
        let mut reading_count = 0u64;

        // A reading has exactly one event date, so querying each date the
        // window touches never counts it twice.
        for sensor in sensors {
            for date in window.event_dates() {
                let readings = self
                    .readings
                    .find_by_sensor_and_time_range(&sensor.sensor_id, date, window.start, window.end)
                    .await?;

                for r in &readings {
                    total += r.energy_kwh;
                    if sensor.is_solar() {
                        solar += r.energy_kwh;
                    } else {
                        grid += r.energy_kwh;
                    }
                    reading_count += 1;
                }
            }
        }

        Ok(HourlyBucket {
            hour: window.hour,
            time_label: window.time_label(),
            total_kwh: round_half_up(total, 2),
            solar_kwh: round_half_up(solar, 2),
            grid_kwh: round_half_up(grid, 2),
            reading_count,
        })
    }
}

#[async_trait::async_trait]
impl AggregationStrategy for ScanAggregator {
    async fn scope_stats(&self, scope: &str, sensors: &[Sensor], day: NaiveDate) -> Result<StatsSnapshot, StorageError> {
        if sensors.is_empty() {
            return Ok(StatsSnapshot::empty(scope));
        }

        let per_sensor = try_join_all(sensors.iter().map(|s| self.sensor_day(s, day))).await?;

        let total_kwh: Decimal = per_sensor.iter().map(|(total, _)| *total).sum();

        // Sensors without readings today do not drag the average down.
        let voltages: Vec<Decimal> = per_sensor.iter().filter_map(|(_, v)| *v).collect();
        let avg_voltage = if voltages.is_empty() {
            Decimal::ZERO
        } else {
            voltages.iter().sum::<Decimal>() / Decimal::from(voltages.len())
        };

        let sensor_count = sensors.len();
        let solar_count = sensors.iter().filter(|s| s.is_solar()).count();
        let active_sensor_count = sensors.iter().filter(|s| s.status.is_active()).count();

        let solar_fraction = round_half_up(Decimal::from(solar_count) / Decimal::from(sensor_count), 4);

        Ok(StatsSnapshot {
            scope: scope.to_string(),
            total_kwh: round_half_up(total_kwh, 2),
            solar_ratio_percent: round_half_up(solar_fraction * Decimal::ONE_HUNDRED, 2),
            sensor_count,
            active_sensor_count,
            avg_voltage: round_half_up(avg_voltage, 2),
        })
    }

    async fn hourly_buckets(&self, sensors: &[Sensor], windows: &[HourWindow]) -> Result<Vec<HourlyBucket>, StorageError> {
        let mut out = Vec::with_capacity(windows.len());
        for window in windows {
            out.push(self.bucket(sensors, window).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aggregation::CITY_SCOPE, stores::MemoryReadingStore};
    use chrono::{DateTime, TimeZone, Utc};
    use energy_client::{EnergySource, Reading, SensorStatus};
    use rust_decimal_macros::dec;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, 5).unwrap()
    }

    async fn put(store: &MemoryReadingStore, sensor: &str, kwh: Decimal, volts: Decimal, at: DateTime<Utc>) {
        put_on(store, day(), sensor, kwh, volts, at).await;
    }

    async fn put_on(
        store: &MemoryReadingStore,
        event_date: NaiveDate,
        sensor: &str,
        kwh: Decimal,
        volts: Decimal,
        at: DateTime<Utc>,
    ) {
        store
            .insert(Reading {
                sensor_id: sensor.to_string(),
                event_date,
                energy_kwh: kwh,
                voltage: volts,
                recorded_at: at,
            })
            .await
            .unwrap();
    }

    fn sensors() -> Vec<Sensor> {
        vec![
            Sensor::new("g1", "Menteng", EnergySource::Grid, SensorStatus::Active),
            Sensor::new("g2", "Menteng", EnergySource::Grid, SensorStatus::from("active")),
            Sensor::new("g3", "Menteng", EnergySource::Grid, SensorStatus::Inactive),
            Sensor::new("s1", "Menteng", EnergySource::Solar, SensorStatus::Active),
        ]
    }

    #[tokio::test]
    async fn scope_stats_over_four_sensors() {
        let store = Arc::new(MemoryReadingStore::default());
        let t = Utc.with_ymd_and_hms(2024, 11, 5, 1, 0, 0).unwrap();
        put(&store, "g1", dec!(1.005), dec!(220), t).await;
        put(&store, "g1", dec!(1.005), dec!(224), t).await;
        put(&store, "s1", dec!(0.5), dec!(230), t).await;
        // g2 and g3 have no readings today.

        let agg = ScanAggregator::new(store);
        let snap = agg.scope_stats("Menteng", &sensors(), day()).await.unwrap();

        assert_eq!(snap.solar_ratio_percent.to_string(), "25.00");
        assert_eq!(snap.total_kwh.to_string(), "2.51");
        assert_eq!(snap.sensor_count, 4);
        assert_eq!(snap.active_sensor_count, 3);
        // (222 + 230) / 2, not divided by four.
        assert_eq!(snap.avg_voltage.to_string(), "226.00");
    }

    #[tokio::test]
    async fn total_rounds_half_up() {
        let store = Arc::new(MemoryReadingStore::default());
        let t = Utc.with_ymd_and_hms(2024, 11, 5, 1, 0, 0).unwrap();
        put(&store, "g1", dec!(1.005), dec!(220), t).await;
        put(&store, "g2", dec!(1.005), dec!(220), t).await;
        put(&store, "g3", dec!(0.0025), dec!(220), t).await;

        let agg = ScanAggregator::new(store);
        let snap = agg.scope_stats(CITY_SCOPE, &sensors(), day()).await.unwrap();

        // 2.0125 -> 2.01
        assert_eq!(snap.total_kwh, dec!(2.01));
    }

    #[tokio::test]
    async fn solar_ratio_uses_four_decimal_intermediate() {
        let store = Arc::new(MemoryReadingStore::default());
        let agg = ScanAggregator::new(store);
        let three = vec![
            Sensor::new("a", "X", EnergySource::Solar, SensorStatus::Active),
            Sensor::new("b", "X", EnergySource::Grid, SensorStatus::Active),
            Sensor::new("c", "X", EnergySource::Grid, SensorStatus::Active),
        ];

        let snap = agg.scope_stats("X", &three, day()).await.unwrap();
        assert_eq!(snap.solar_ratio_percent.to_string(), "33.33");
        assert_eq!(snap.avg_voltage, Decimal::ZERO);
        assert_eq!(snap.total_kwh, Decimal::ZERO);
    }

    #[tokio::test]
    async fn buckets_split_by_source_and_count_readings() {
        let store = Arc::new(MemoryReadingStore::default());
        let h1_start = Utc.with_ymd_and_hms(2024, 11, 5, 1, 0, 0).unwrap();
        let h1_last_second = Utc.with_ymd_and_hms(2024, 11, 5, 1, 59, 59).unwrap();
        let h2_start = Utc.with_ymd_and_hms(2024, 11, 5, 2, 0, 0).unwrap();

        put(&store, "g1", dec!(1.111), dec!(220), h1_start).await;
        put(&store, "g1", dec!(2), dec!(220), h1_last_second).await;
        put(&store, "s1", dec!(0.5), dec!(220), h1_start).await;
        put(&store, "s1", dec!(4), dec!(220), h2_start).await;

        let windows: Vec<HourWindow> = [1u32, 2]
            .iter()
            .map(|&h| {
                let start = Utc.with_ymd_and_hms(2024, 11, 5, h, 0, 0).unwrap();
                HourWindow {
                    hour: h,
                    start,
                    end: start + chrono::Duration::hours(1) - chrono::Duration::nanoseconds(1),
                    first_event_date: day(),
                    last_event_date: day(),
                }
            })
            .collect();

        let agg = ScanAggregator::new(store);
        let buckets = agg.hourly_buckets(&sensors(), &windows).await.unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].reading_count, 3);
        assert_eq!(buckets[0].grid_kwh.to_string(), "3.11");
        assert_eq!(buckets[0].solar_kwh.to_string(), "0.50");
        assert_eq!(buckets[0].total_kwh.to_string(), "3.61");
        assert_eq!(buckets[1].time_label, "02:00");
        assert_eq!(buckets[1].reading_count, 1);
        assert_eq!(buckets[1].solar_kwh, dec!(4));
    }

    #[tokio::test]
    async fn bucket_reads_every_event_date_the_window_touches() {
        let store = Arc::new(MemoryReadingStore::default());
        let before_midnight = Utc.with_ymd_and_hms(2024, 11, 5, 16, 30, 0).unwrap();
        let after_midnight = Utc.with_ymd_and_hms(2024, 11, 5, 17, 10, 0).unwrap();
        let next_day = day().succ_opt().unwrap();

        // Counter-zone midnight falls at 17:00 inside this window.
        put(&store, "g1", dec!(1), dec!(220), before_midnight).await;
        put_on(&store, next_day, "g1", dec!(2), dec!(220), after_midnight).await;

        let start = Utc.with_ymd_and_hms(2024, 11, 5, 16, 30, 0).unwrap();
        let window = HourWindow {
            hour: 16,
            start,
            end: start + chrono::Duration::hours(1) - chrono::Duration::nanoseconds(1),
            first_event_date: day(),
            last_event_date: next_day,
        };

        let agg = ScanAggregator::new(store);
        let buckets = agg.hourly_buckets(&sensors(), &[window]).await.unwrap();

        assert_eq!(buckets[0].reading_count, 2);
        assert_eq!(buckets[0].grid_kwh, dec!(3.00));
    }
}
