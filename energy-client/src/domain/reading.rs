use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One persisted meter measurement. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Reading {
    pub sensor_id: String,
    pub event_date: NaiveDate,
    pub energy_kwh: Decimal,
    pub voltage: Decimal,
    pub recorded_at: DateTime<Utc>,
}

fn hash_str(hasher: &mut blake3::Hasher, s: &str) {
    let len = s.len() as u32;
    hasher.update(&len.to_le_bytes());
    hasher.update(s.as_bytes());
}

fn hash_decimal(hasher: &mut blake3::Hasher, d: Decimal) {
    // 2.5 and 2.50 must hash the same.
    hasher.update(&d.normalize().serialize());
}

impl Reading {
    /// Deterministic id over the reading's content, used as the store's
    /// conflict key so a retried insert does not duplicate the row.
    pub fn reading_id(&self) -> String {
        let mut h = blake3::Hasher::new();
        hash_str(&mut h, &self.sensor_id);
        h.update(&self.recorded_at.timestamp_micros().to_le_bytes());
        hash_decimal(&mut h, self.energy_kwh);
        hash_decimal(&mut h, self.voltage);
        h.finalize().to_hex().to_string()
    }
}
