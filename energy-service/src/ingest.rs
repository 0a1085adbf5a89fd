//! Reading ingestion: persist, bump the daily counter, notify subscribers.
//!
//! Every ingest goes through [`Ingestor::ingest_async`], which returns once the
//! reading is durable. Counter and notification work runs on a spawned task
//! whose outcome is carried by the returned [`IngestHandle`]. The blocking
//! mode [`Ingestor::ingest`] is that same call followed by awaiting the handle.

use std::{str::FromStr, sync::Arc, time::Duration};

use chrono::NaiveDate;
use energy_client::{EnergySource, Reading};
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::{
    clock::{date_in, Clock},
    counters::kwh_to_whole_wh,
    notify::{sensor_topic, LatestReading, LiveUpdateSink, NotificationError, ALL_SENSORS_TOPIC},
    stores::{Catalog, CounterStore, ReadingStore, StorageError},
};

const DEFAULT_CATALOG_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("invalid reading: {0}")]
    Validation(String),
    /// The reading was persisted but the sensor is not in the catalog, so the
    /// counter was not incremented and nothing was published.
    #[error("unknown sensor '{0}'")]
    UnknownSensor(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("background completion failed: {0}")]
    Background(String),
}

/// One incoming measurement before it becomes a [`Reading`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IngestRequest {
    pub sensor_id: String,
    pub energy_kwh: Decimal,
    pub voltage: Decimal,
}

impl IngestRequest {
    pub fn new(sensor_id: impl Into<String>, energy_kwh: Decimal, voltage: Decimal) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            energy_kwh,
            voltage,
        }
    }

    /// Build a request from raw text fields, rejecting non-numeric values.
    pub fn parse(sensor_id: &str, energy_kwh: &str, voltage: &str) -> Result<Self, IngestError> {
        let energy = Decimal::from_str(energy_kwh.trim())
            .map_err(|e| IngestError::Validation(format!("energy '{energy_kwh}' is not a number: {e}")))?;
        let volts = Decimal::from_str(voltage.trim())
            .map_err(|e| IngestError::Validation(format!("voltage '{voltage}' is not a number: {e}")))?;
        Ok(Self::new(sensor_id.trim(), energy, volts))
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.sensor_id.trim().is_empty() {
            return Err(IngestError::Validation("sensor_id must not be empty".to_string()));
        }
        if self.energy_kwh < Decimal::ZERO {
            return Err(IngestError::Validation("energy must be non-negative".to_string()));
        }
        if self.voltage < Decimal::ZERO {
            return Err(IngestError::Validation("voltage must be non-negative".to_string()));
        }
        if kwh_to_whole_wh(self.energy_kwh).is_none() {
            return Err(IngestError::Validation("energy is out of range".to_string()));
        }
        Ok(())
    }
}

/// What the background step did for one reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterUpdate {
    pub date: NaiveDate,
    pub source: EnergySource,
    pub added_wh: u64,
    pub new_total_wh: u64,
    /// False when at least one publish failed. Never an error.
    pub notified: bool,
}

/// A persisted reading plus the pending counter/notification step.
#[derive(Debug)]
pub struct IngestHandle {
    reading: Reading,
    completion: JoinHandle<Result<CounterUpdate, IngestError>>,
}

impl IngestHandle {
    /// The reading as stored. Available before the background step finishes.
    pub fn reading(&self) -> &Reading {
        &self.reading
    }

    pub async fn completion(self) -> Result<CounterUpdate, IngestError> {
        match self.completion.await {
            Ok(res) => res,
            Err(e) => Err(IngestError::Background(e.to_string())),
        }
    }

    /// Wait for the background step and hand back the reading.
    pub async fn wait(self) -> Result<Reading, IngestError> {
        let reading = self.reading.clone();
        self.completion().await?;
        Ok(reading)
    }
}

#[derive(Clone)]
pub struct Ingestor {
    readings: Arc<dyn ReadingStore>,
    catalog: Arc<dyn Catalog>,
    counters: Arc<dyn CounterStore>,
    live: Arc<dyn LiveUpdateSink>,
    clock: Arc<dyn Clock>,
    counter_zone: chrono_tz::Tz,
    catalog_timeout: Duration,
}

impl Ingestor {
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        catalog: Arc<dyn Catalog>,
        counters: Arc<dyn CounterStore>,
        live: Arc<dyn LiveUpdateSink>,
        clock: Arc<dyn Clock>,
        counter_zone: chrono_tz::Tz,
    ) -> Self {
        Self {
            readings,
            catalog,
            counters,
            live,
            clock,
            counter_zone,
            catalog_timeout: DEFAULT_CATALOG_TIMEOUT,
        }
    }

    pub fn with_catalog_timeout(mut self, timeout: Duration) -> Self {
        self.catalog_timeout = timeout;
        self
    }

    /// Ingest and wait for the counter update and notifications.
    pub async fn ingest(&self, req: IngestRequest) -> Result<Reading, IngestError> {
        self.ingest_async(req).await?.wait().await
    }

    /// Validate and persist, then continue the counter update and
    /// notifications in the background.
    ///
    /// Errors returned here happen before anything is persisted.
    pub async fn ingest_async(&self, req: IngestRequest) -> Result<IngestHandle, IngestError> {
        req.validate().inspect_err(|_| {
            metrics::counter!("validation_reading_rejected_total").increment(1);
        })?;

        let now = self.clock.now();
        let reading = Reading {
            sensor_id: req.sensor_id,
            event_date: date_in(self.counter_zone, now),
            energy_kwh: req.energy_kwh,
            voltage: req.voltage,
            recorded_at: now,
        };

        let saved = self.readings.insert(reading).await.map_err(|e| {
            tracing::error!(error = %e, "failed to persist reading");
            metrics::counter!("energy_ingest_storage_errors_total").increment(1);
            IngestError::Storage(e)
        })?;
        metrics::counter!("energy_readings_ingested_total").increment(1);

        let this = self.clone();
        let persisted = saved.clone();
        let completion = tokio::spawn(async move { this.complete(&persisted).await });

        Ok(IngestHandle {
            reading: saved,
            completion,
        })
    }

    async fn complete(&self, reading: &Reading) -> Result<CounterUpdate, IngestError> {
        let started = std::time::Instant::now();

        let sensor = tokio::time::timeout(self.catalog_timeout, self.catalog.find_sensor(&reading.sensor_id))
            .await
            .map_err(|_| StorageError::new(format!("catalog lookup for '{}' timed out", reading.sensor_id)))??;

        let Some(sensor) = sensor else {
            tracing::warn!(
                sensor_id = %reading.sensor_id,
                event_date = %reading.event_date,
                "reading persisted for unknown sensor; counter not updated"
            );
            metrics::counter!("energy_ingest_unknown_sensor_total").increment(1);
            return Err(IngestError::UnknownSensor(reading.sensor_id.clone()));
        };

        let wh = kwh_to_whole_wh(reading.energy_kwh)
            .ok_or_else(|| IngestError::Validation("energy is out of range".to_string()))?;
        let source = sensor.energy_source;
        let new_total_wh = self
            .counters
            .increment(reading.event_date, source, wh)
            .await
            .inspect_err(|e| {
                tracing::error!(error = %e, sensor_id = %reading.sensor_id, "daily counter increment failed");
                metrics::counter!("energy_ingest_storage_errors_total").increment(1);
            })?;
        metrics::counter!("energy_counter_increment_wh_total", "source" => source.as_str()).increment(wh);

        let notified = self.notify(reading);

        metrics::histogram!("energy_ingest_latency_seconds").record(started.elapsed().as_secs_f64());

        Ok(CounterUpdate {
            date: reading.event_date,
            source,
            added_wh: wh,
            new_total_wh,
            notified,
        })
    }

    fn notify(&self, reading: &Reading) -> bool {
        let payload = LatestReading::from(reading);
        let mut ok = true;
        for topic in [sensor_topic(&reading.sensor_id), ALL_SENSORS_TOPIC.to_string()] {
            if let Err(e) = self.live.publish(&topic, &payload) {
                ok = false;
                metrics::counter!("energy_notification_failures_total").increment(1);
                match e {
                    NotificationError::NoSubscribers(_) => tracing::debug!(error = %e, "live update dropped"),
                    NotificationError::Publish { .. } => tracing::warn!(error = %e, "live update failed"),
                }
            }
        }
        ok
    }

    pub async fn latest_reading(&self, sensor_id: &str) -> Result<Option<LatestReading>, StorageError> {
        Ok(self
            .readings
            .find_latest(sensor_id)
            .await?
            .as_ref()
            .map(LatestReading::from))
    }

    pub async fn readings_on(&self, sensor_id: &str, date: NaiveDate) -> Result<Vec<LatestReading>, StorageError> {
        let readings = self.readings.find_by_sensor_and_date(sensor_id, date).await?;
        Ok(readings.iter().map(LatestReading::from).collect())
    }

    /// Sum of the sensor's readings for `date`, read from the reading store.
    pub async fn daily_total(&self, sensor_id: &str, date: NaiveDate) -> Result<Decimal, StorageError> {
        self.readings.daily_total(sensor_id, date).await
    }

    pub async fn average_voltage(&self, sensor_id: &str, date: NaiveDate) -> Result<Option<Decimal>, StorageError> {
        self.readings.average_voltage(sensor_id, date).await
    }
}
