use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use energy_client::{DistrictProfile, Reading, Sensor};
use tokio::sync::RwLock;

use super::{Catalog, ReadingStore, StorageError};

/// Reading log kept in process memory, partitioned by sensor.
#[derive(Debug, Default)]
pub struct MemoryReadingStore {
    by_sensor: RwLock<HashMap<String, Vec<Reading>>>,
}

impl MemoryReadingStore {
    pub async fn len(&self) -> usize {
        self.by_sensor.read().await.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait::async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn insert(&self, reading: Reading) -> Result<Reading, StorageError> {
        let mut guard = self.by_sensor.write().await;
        guard
            .entry(reading.sensor_id.clone())
            .or_default()
            .push(reading.clone());
        Ok(reading)
    }

    async fn find_by_sensor_and_date(&self, sensor_id: &str, date: NaiveDate) -> Result<Vec<Reading>, StorageError> {
        let guard = self.by_sensor.read().await;
        let mut out: Vec<Reading> = guard
            .get(sensor_id)
            .map(|rs| rs.iter().filter(|r| r.event_date == date).cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|r| r.recorded_at);
        Ok(out)
    }

    async fn find_by_sensor_and_time_range(
        &self,
        sensor_id: &str,
        date: NaiveDate,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Reading>, StorageError> {
        let guard = self.by_sensor.read().await;
        let mut out: Vec<Reading> = guard
            .get(sensor_id)
            .map(|rs| {
                rs.iter()
                    .filter(|r| r.event_date == date && r.recorded_at >= start && r.recorded_at <= end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|r| r.recorded_at);
        Ok(out)
    }

    async fn find_latest(&self, sensor_id: &str) -> Result<Option<Reading>, StorageError> {
        let guard = self.by_sensor.read().await;
        Ok(guard
            .get(sensor_id)
            .and_then(|rs| rs.iter().max_by_key(|r| r.recorded_at))
            .cloned())
    }
}

/// Sensor and district registry kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    sensors: RwLock<BTreeMap<String, Sensor>>,
    districts: RwLock<BTreeMap<String, DistrictProfile>>,
}

impl MemoryCatalog {
    pub fn new(sensors: impl IntoIterator<Item = Sensor>, districts: impl IntoIterator<Item = DistrictProfile>) -> Self {
        Self {
            sensors: RwLock::new(sensors.into_iter().map(|s| (s.sensor_id.clone(), s)).collect()),
            districts: RwLock::new(districts.into_iter().map(|d| (d.name.clone(), d)).collect()),
        }
    }
}

#[async_trait::async_trait]
impl Catalog for MemoryCatalog {
    async fn find_sensor(&self, sensor_id: &str) -> Result<Option<Sensor>, StorageError> {
        Ok(self.sensors.read().await.get(sensor_id).cloned())
    }

    async fn find_by_district(&self, name: &str) -> Result<Vec<Sensor>, StorageError> {
        Ok(self
            .sensors
            .read()
            .await
            .values()
            .filter(|s| s.district == name)
            .cloned()
            .collect())
    }

    async fn find_all_sensors(&self) -> Result<Vec<Sensor>, StorageError> {
        Ok(self.sensors.read().await.values().cloned().collect())
    }

    async fn find_all_district_profiles(&self) -> Result<Vec<DistrictProfile>, StorageError> {
        Ok(self.districts.read().await.values().cloned().collect())
    }
}
