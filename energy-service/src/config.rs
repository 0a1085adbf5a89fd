use std::{fs, time::Duration};

use anyhow::Context;
use chrono_tz::Tz;
use energy_client::{DistrictProfile, Sensor};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{analytics::Tariff, clock::ZoneSettings};

const DEFAULT_ZONE: &str = "Asia/Jakarta";

fn default_grid_price() -> Decimal {
    Decimal::from(1500)
}

fn default_emission_factor() -> Decimal {
    Decimal::new(8, 1)
}

fn default_zone() -> String {
    DEFAULT_ZONE.to_string()
}

/// Prices, emission factor and the two time zones used for day/hour boundaries.
#[derive(Debug, Clone, Deserialize)]
pub struct EnergyConfig {
    #[serde(default = "default_grid_price")]
    pub grid_price_per_kwh: Decimal,
    #[serde(default)]
    pub solar_price_per_kwh: Decimal,
    #[serde(default = "default_emission_factor")]
    pub emission_factor_kg_per_kwh: Decimal,
    /// Zone that decides a reading's event date and the analytics "today".
    #[serde(default = "default_zone")]
    pub counter_zone: String,
    /// Zone that hourly buckets are laid out in.
    #[serde(default = "default_zone")]
    pub presentation_zone: String,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self {
            grid_price_per_kwh: default_grid_price(),
            solar_price_per_kwh: Decimal::ZERO,
            emission_factor_kg_per_kwh: default_emission_factor(),
            counter_zone: default_zone(),
            presentation_zone: default_zone(),
        }
    }
}

impl EnergyConfig {
    pub fn tariff(&self) -> Tariff {
        Tariff {
            grid_price_per_kwh: self.grid_price_per_kwh,
            solar_price_per_kwh: self.solar_price_per_kwh,
            emission_factor_kg_per_kwh: self.emission_factor_kg_per_kwh,
        }
    }

    pub fn zones(&self) -> anyhow::Result<ZoneSettings> {
        Ok(ZoneSettings {
            counter_zone: parse_zone(&self.counter_zone)?,
            presentation_zone: parse_zone(&self.presentation_zone)?,
        })
    }
}

fn parse_zone(name: &str) -> anyhow::Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("invalid time zone '{name}': {e}"))
}

fn default_catalog_timeout_ms() -> u64 {
    2000
}

fn default_workers() -> usize {
    4
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    #[serde(default = "default_catalog_timeout_ms")]
    pub catalog_timeout_ms: u64,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            catalog_timeout_ms: default_catalog_timeout_ms(),
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl IngestConfig {
    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_millis(self.catalog_timeout_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Memory,
    Postgres,
}

fn default_max_connections() -> u32 {
    8
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub kind: StorageKind,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Memory,
            uri: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

fn default_live_capacity() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveUpdatesConfig {
    #[serde(default = "default_live_capacity")]
    pub capacity: usize,
}

impl Default for LiveUpdatesConfig {
    fn default() -> Self {
        Self {
            capacity: default_live_capacity(),
        }
    }
}

/// Sensors and districts loaded into the in-memory catalog at startup.
/// Ignored by the postgres backend, which reads its own tables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub sensors: Vec<Sensor>,
    #[serde(default)]
    pub districts: Vec<DistrictProfile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub energy: EnergyConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub live_updates: LiveUpdatesConfig,
    #[serde(default)]
    pub catalog: CatalogSeed,
    pub replay: Option<ReplayConfig>,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("ENERGY_CONFIG").unwrap_or_else(|_| "energy-config.toml".to_string());
        let contents = fs::read_to_string(&path).with_context(|| format!("failed to read config file {path}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        // Surface bad zone names at startup rather than on first query.
        cfg.energy.zones()?;
        Ok(cfg)
    }
}
