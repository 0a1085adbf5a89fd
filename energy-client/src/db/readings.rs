use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::domain::Reading;

/// Insert a reading. Re-inserting the same reading is a no-op.
pub async fn insert_reading(pool: &PgPool, reading: &Reading) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO energy_log (reading_id, sensor_id, event_date, energy_kwh, voltage, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (reading_id) DO NOTHING
        "#,
    )
    .bind(reading.reading_id())
    .bind(&reading.sensor_id)
    .bind(reading.event_date)
    .bind(reading.energy_kwh)
    .bind(reading.voltage)
    .bind(reading.recorded_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// All readings of one sensor for an event date, oldest first.
pub async fn readings_by_date(pool: &PgPool, sensor_id: &str, date: NaiveDate) -> Result<Vec<Reading>> {
    let rows = sqlx::query_as::<_, Reading>(
        r#"
        SELECT sensor_id, event_date, energy_kwh, voltage, recorded_at
        FROM energy_log
        WHERE sensor_id = $1
          AND event_date = $2
        ORDER BY recorded_at
        "#,
    )
    .bind(sensor_id)
    .bind(date)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Readings of one sensor for an event date whose `recorded_at` lies in
/// `[start, end]` (both inclusive).
pub async fn readings_in_window(
    pool: &PgPool,
    sensor_id: &str,
    date: NaiveDate,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Reading>> {
    let rows = sqlx::query_as::<_, Reading>(
        r#"
        SELECT sensor_id, event_date, energy_kwh, voltage, recorded_at
        FROM energy_log
        WHERE sensor_id = $1
          AND event_date = $2
          AND recorded_at >= $3
          AND recorded_at <= $4
        ORDER BY recorded_at
        "#,
    )
    .bind(sensor_id)
    .bind(date)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

pub async fn latest_reading(pool: &PgPool, sensor_id: &str) -> Result<Option<Reading>> {
    let row = sqlx::query_as::<_, Reading>(
        r#"
        SELECT sensor_id, event_date, energy_kwh, voltage, recorded_at
        FROM energy_log
        WHERE sensor_id = $1
        ORDER BY recorded_at DESC
        LIMIT 1
        "#,
    )
    .bind(sensor_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Sum of kWh for a sensor on an event date; zero when there are no readings.
pub async fn daily_total(pool: &PgPool, sensor_id: &str, date: NaiveDate) -> Result<Decimal> {
    let total = sqlx::query_scalar::<_, Decimal>(
        r#"
        SELECT COALESCE(SUM(energy_kwh), 0)
        FROM energy_log
        WHERE sensor_id = $1
          AND event_date = $2
        "#,
    )
    .bind(sensor_id)
    .bind(date)
    .fetch_one(pool)
    .await?;

    Ok(total)
}

/// Mean voltage for a sensor on an event date, `None` when there are no readings.
pub async fn average_voltage(pool: &PgPool, sensor_id: &str, date: NaiveDate) -> Result<Option<Decimal>> {
    let avg = sqlx::query_scalar::<_, Option<Decimal>>(
        r#"
        SELECT AVG(voltage)
        FROM energy_log
        WHERE sensor_id = $1
          AND event_date = $2
        "#,
    )
    .bind(sensor_id)
    .bind(date)
    .fetch_one(pool)
    .await?;

    Ok(avg)
}
