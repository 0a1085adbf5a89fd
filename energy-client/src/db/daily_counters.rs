use anyhow::Result;
use chrono::NaiveDate;
use sqlx::PgPool;

use crate::domain::EnergySource;

/// Add `wh` to the (date, source) counter in one statement and return the
/// new total. The row is created on first increment.
pub async fn increment_wh(pool: &PgPool, date: NaiveDate, source: EnergySource, wh: i64) -> Result<i64> {
    let total = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO energy_daily_summary (summary_date, energy_source, total_wh)
        VALUES ($1, $2, $3)
        ON CONFLICT (summary_date, energy_source)
        DO UPDATE SET total_wh = energy_daily_summary.total_wh + EXCLUDED.total_wh
        RETURNING total_wh
        "#,
    )
    .bind(date)
    .bind(source.as_str())
    .bind(wh)
    .fetch_one(pool)
    .await?;

    Ok(total)
}

pub async fn total_wh(pool: &PgPool, date: NaiveDate, source: EnergySource) -> Result<i64> {
    let total = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COALESCE(MAX(total_wh), 0)
        FROM energy_daily_summary
        WHERE summary_date = $1
          AND energy_source = $2
        "#,
    )
    .bind(date)
    .bind(source.as_str())
    .fetch_one(pool)
    .await?;

    Ok(total)
}
