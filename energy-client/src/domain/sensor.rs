use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Where a sensor's energy comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EnergySource {
    Grid,
    Solar,
}

impl EnergySource {
    pub const ALL: [EnergySource; 2] = [EnergySource::Grid, EnergySource::Solar];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnergySource::Grid => "GRID",
            EnergySource::Solar => "SOLAR",
        }
    }
}

impl fmt::Display for EnergySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown energy source '{0}'")]
pub struct UnknownEnergySource(pub String);

impl FromStr for EnergySource {
    type Err = UnknownEnergySource;

    /// Catalog rows carry mixed case ("Solar", "GRID"), so matching ignores case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("grid") {
            Ok(EnergySource::Grid)
        } else if trimmed.eq_ignore_ascii_case("solar") {
            Ok(EnergySource::Solar)
        } else {
            Err(UnknownEnergySource(s.to_string()))
        }
    }
}

/// Operational status of a sensor. Statuses other than active/inactive are
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SensorStatus {
    Active,
    Inactive,
    Other(String),
}

impl SensorStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SensorStatus::Active)
    }
}

impl From<&str> for SensorStatus {
    fn from(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("active") {
            SensorStatus::Active
        } else if trimmed.eq_ignore_ascii_case("inactive") {
            SensorStatus::Inactive
        } else {
            SensorStatus::Other(trimmed.to_string())
        }
    }
}

impl From<String> for SensorStatus {
    fn from(s: String) -> Self {
        SensorStatus::from(s.as_str())
    }
}

impl From<SensorStatus> for String {
    fn from(s: SensorStatus) -> Self {
        s.to_string()
    }
}

impl fmt::Display for SensorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorStatus::Active => f.write_str("ACTIVE"),
            SensorStatus::Inactive => f.write_str("INACTIVE"),
            SensorStatus::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub sensor_id: String,
    pub district: String,
    pub energy_source: EnergySource,
    pub status: SensorStatus,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Sensor {
    pub fn new(
        sensor_id: impl Into<String>,
        district: impl Into<String>,
        energy_source: EnergySource,
        status: SensorStatus,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            district: district.into(),
            energy_source,
            status,
            latitude: None,
            longitude: None,
        }
    }

    pub fn is_solar(&self) -> bool {
        self.energy_source == EnergySource::Solar
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DistrictProfile {
    pub name: String,
    pub category: String,
    pub description: Option<String>,
}
