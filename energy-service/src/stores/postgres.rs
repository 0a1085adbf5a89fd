use chrono::{DateTime, NaiveDate, Utc};
use energy_client::{db, DistrictProfile, EnergySource, Reading, Sensor};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;

use super::{Catalog, CounterStore, ReadingStore, StorageError};

pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ReadingStore for PgReadingStore {
    async fn insert(&self, reading: Reading) -> Result<Reading, StorageError> {
        db::readings::insert_reading(&self.pool, &reading).await?;
        Ok(reading)
    }

    async fn find_by_sensor_and_date(&self, sensor_id: &str, date: NaiveDate) -> Result<Vec<Reading>, StorageError> {
        Ok(db::readings::readings_by_date(&self.pool, sensor_id, date).await?)
    }

    async fn find_by_sensor_and_time_range(
        &self,
        sensor_id: &str,
        date: NaiveDate,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StorageError> {
        Ok(db::readings::readings_in_window(&self.pool, sensor_id, date, start, end).await?)
    }

    async fn find_latest(&self, sensor_id: &str) -> Result<Option<Reading>, StorageError> {
        Ok(db::readings::latest_reading(&self.pool, sensor_id).await?)
    }

    async fn daily_total(&self, sensor_id: &str, date: NaiveDate) -> Result<Decimal, StorageError> {
        Ok(db::readings::daily_total(&self.pool, sensor_id, date).await?)
    }

    async fn average_voltage(&self, sensor_id: &str, date: NaiveDate) -> Result<Option<Decimal>, StorageError> {
        Ok(db::readings::average_voltage(&self.pool, sensor_id, date).await?)
    }
}

pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl Catalog for PgCatalog {
    async fn find_sensor(&self, sensor_id: &str) -> Result<Option<Sensor>, StorageError> {
        Ok(db::catalog::find_sensor(&self.pool, sensor_id).await?)
    }

    async fn find_by_district(&self, name: &str) -> Result<Vec<Sensor>, StorageError> {
        Ok(db::catalog::sensors_in_district(&self.pool, name).await?)
    }

    async fn find_all_sensors(&self) -> Result<Vec<Sensor>, StorageError> {
        Ok(db::catalog::all_sensors(&self.pool).await?)
    }

    async fn find_all_district_profiles(&self) -> Result<Vec<DistrictProfile>, StorageError> {
        Ok(db::catalog::all_district_profiles(&self.pool).await?)
    }
}

/// Counters held in `energy_daily_summary`; each increment is one upsert
/// statement, so concurrent writers are serialised by the row lock.
pub struct PgCounterStore {
    pool: PgPool,
}

impl PgCounterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(&self, date: NaiveDate, source: EnergySource, amount_wh: u64) -> Result<u64, StorageError> {
        let amount = i64::try_from(amount_wh)
            .map_err(|_| StorageError::new(format!("increment of {amount_wh} Wh does not fit the counter column")))?;
        let total = db::daily_counters::increment_wh(&self.pool, date, source, amount).await?;
        u64::try_from(total).map_err(|_| StorageError::new(format!("negative counter total {total} for {date} {source}")))
    }

    async fn get_total(&self, date: NaiveDate, source: EnergySource) -> Result<u64, StorageError> {
        let total = db::daily_counters::total_wh(&self.pool, date, source).await?;
        u64::try_from(total).map_err(|_| StorageError::new(format!("negative counter total {total} for {date} {source}")))
    }
}
