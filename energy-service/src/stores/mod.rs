//! Boundaries to the persistence collaborators: the raw reading log, the
//! sensor/district catalog and the per-day counter store.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use energy_client::{DistrictProfile, EnergySource, Reading, Sensor};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;

use crate::{
    config::{CatalogSeed, StorageConfig, StorageKind},
    counters::AtomicCounterStore,
};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryCatalog, MemoryReadingStore};
pub use postgres::{PgCatalog, PgCounterStore, PgReadingStore};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

impl StorageError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<anyhow::Error> for StorageError {
    fn from(e: anyhow::Error) -> Self {
        Self(format!("{e:#}"))
    }
}

#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync {
    async fn insert(&self, reading: Reading) -> Result<Reading, StorageError>;

    async fn find_by_sensor_and_date(&self, sensor_id: &str, date: NaiveDate) -> Result<Vec<Reading>, StorageError>;

    /// Readings for `date` with `start <= recorded_at <= end`.
    async fn find_by_sensor_and_time_range(
        &self,
        sensor_id: &str,
        date: NaiveDate,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StorageError>;

    async fn find_latest(&self, sensor_id: &str) -> Result<Option<Reading>, StorageError>;

    async fn daily_total(&self, sensor_id: &str, date: NaiveDate) -> Result<Decimal, StorageError> {
        let readings = self.find_by_sensor_and_date(sensor_id, date).await?;
        Ok(readings.iter().map(|r| r.energy_kwh).sum())
    }

    /// `None` when the sensor has no readings for `date`.
    async fn average_voltage(&self, sensor_id: &str, date: NaiveDate) -> Result<Option<Decimal>, StorageError> {
        let readings = self.find_by_sensor_and_date(sensor_id, date).await?;
        if readings.is_empty() {
            return Ok(None);
        }
        let sum: Decimal = readings.iter().map(|r| r.voltage).sum();
        Ok(Some(sum / Decimal::from(readings.len())))
    }
}

#[async_trait::async_trait]
pub trait Catalog: Send + Sync {
    async fn find_sensor(&self, sensor_id: &str) -> Result<Option<Sensor>, StorageError>;
    async fn find_by_district(&self, name: &str) -> Result<Vec<Sensor>, StorageError>;
    async fn find_all_sensors(&self) -> Result<Vec<Sensor>, StorageError>;
    async fn find_all_district_profiles(&self) -> Result<Vec<DistrictProfile>, StorageError>;
}

/// Whole watt-hour accumulators keyed by (date, source).
#[async_trait::async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `amount_wh` and return the new total. Must not lose updates under
    /// concurrent callers on the same key.
    async fn increment(&self, date: NaiveDate, source: EnergySource, amount_wh: u64) -> Result<u64, StorageError>;

    /// Zero for keys that were never incremented.
    async fn get_total(&self, date: NaiveDate, source: EnergySource) -> Result<u64, StorageError>;
}

/// The three stores, wired for one backend.
#[derive(Clone)]
pub struct Stores {
    pub readings: Arc<dyn ReadingStore>,
    pub catalog: Arc<dyn Catalog>,
    pub counters: Arc<dyn CounterStore>,
}

impl Stores {
    pub fn in_memory(catalog: MemoryCatalog) -> Self {
        Self {
            readings: Arc::new(MemoryReadingStore::default()),
            catalog: Arc::new(catalog),
            counters: Arc::new(AtomicCounterStore::default()),
        }
    }

    pub async fn connect(cfg: &StorageConfig, seed: &CatalogSeed) -> anyhow::Result<Self> {
        match cfg.kind {
            StorageKind::Memory => {
                tracing::warn!(
                    sensors = seed.sensors.len(),
                    districts = seed.districts.len(),
                    "using in-memory stores; readings are lost on restart"
                );
                let catalog = MemoryCatalog::new(seed.sensors.iter().cloned(), seed.districts.iter().cloned());
                Ok(Self::in_memory(catalog))
            }
            StorageKind::Postgres => {
                let uri = cfg
                    .uri
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("storage.uri is required for postgres storage"))?;
                let pool = PgPoolOptions::new()
                    .max_connections(cfg.max_connections)
                    .connect(uri)
                    .await?;
                Ok(Self {
                    readings: Arc::new(PgReadingStore::new(pool.clone())),
                    catalog: Arc::new(PgCatalog::new(pool.clone())),
                    counters: Arc::new(PgCounterStore::new(pool)),
                })
            }
        }
    }
}
