use anyhow::Result;
use sqlx::PgPool;

use crate::domain::{DistrictProfile, EnergySource, Sensor, SensorStatus};

#[derive(Debug, Clone, sqlx::FromRow)]
struct SensorRow {
    sensor_id: String,
    district: String,
    energy_source: String,
    status: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl TryFrom<SensorRow> for Sensor {
    type Error = anyhow::Error;

    fn try_from(row: SensorRow) -> Result<Self> {
        let energy_source: EnergySource = row.energy_source.parse()?;
        Ok(Sensor {
            sensor_id: row.sensor_id,
            district: row.district,
            energy_source,
            status: SensorStatus::from(row.status),
            latitude: row.latitude,
            longitude: row.longitude,
        })
    }
}

const SENSOR_COLUMNS: &str = "sensor_id, district, energy_source, status, latitude, longitude";

pub async fn find_sensor(pool: &PgPool, sensor_id: &str) -> Result<Option<Sensor>> {
    let sql = format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE sensor_id = $1");
    let row = sqlx::query_as::<_, SensorRow>(&sql)
        .bind(sensor_id)
        .fetch_optional(pool)
        .await?;

    row.map(Sensor::try_from).transpose()
}

pub async fn sensors_in_district(pool: &PgPool, district: &str) -> Result<Vec<Sensor>> {
    let sql = format!("SELECT {SENSOR_COLUMNS} FROM sensors WHERE district = $1 ORDER BY sensor_id");
    let rows = sqlx::query_as::<_, SensorRow>(&sql)
        .bind(district)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(Sensor::try_from).collect()
}

pub async fn all_sensors(pool: &PgPool) -> Result<Vec<Sensor>> {
    let sql = format!("SELECT {SENSOR_COLUMNS} FROM sensors ORDER BY sensor_id");
    let rows = sqlx::query_as::<_, SensorRow>(&sql).fetch_all(pool).await?;

    rows.into_iter().map(Sensor::try_from).collect()
}

pub async fn all_district_profiles(pool: &PgPool) -> Result<Vec<DistrictProfile>> {
    let rows = sqlx::query_as::<_, DistrictProfile>(
        "SELECT name, category, description FROM district_profiles ORDER BY name",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
