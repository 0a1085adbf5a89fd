//! Live-update fan-out for dashboards.

use chrono::{DateTime, Utc};
use energy_client::Reading;
use futures::{Stream, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

pub const ALL_SENSORS_TOPIC: &str = "/topic/energy/all";

pub fn sensor_topic(sensor_id: &str) -> String {
    format!("/topic/energy/{sensor_id}")
}

/// Payload pushed to subscribers and returned by the latest/by-date queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestReading {
    pub sensor_id: String,
    pub energy_kwh: Decimal,
    pub voltage: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl From<&Reading> for LatestReading {
    fn from(r: &Reading) -> Self {
        Self {
            sensor_id: r.sensor_id.clone(),
            energy_kwh: r.energy_kwh,
            voltage: r.voltage,
            recorded_at: r.recorded_at,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("no live subscribers for {0}")]
    NoSubscribers(String),
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Fire-and-forget publisher. Callers log failures and move on.
pub trait LiveUpdateSink: Send + Sync {
    fn publish(&self, topic: &str, payload: &LatestReading) -> Result<(), NotificationError>;
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub topic: String,
    pub payload: LatestReading,
}

/// In-process hub over a single broadcast channel; subscribers filter by topic.
/// Slow subscribers drop the oldest messages rather than back-pressuring
/// ingestion.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Payloads published to `topic` from now on.
    pub fn subscribe(&self, topic: &str) -> impl Stream<Item = LatestReading> + Send + 'static {
        let topic = topic.to_string();
        BroadcastStream::new(self.tx.subscribe()).filter_map(move |msg| {
            let out = match msg {
                Ok(n) if n.topic == topic => Some(n.payload),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, topic = %topic, "live update subscriber lagged");
                    None
                }
            };
            futures::future::ready(out)
        })
    }
}

impl LiveUpdateSink for BroadcastHub {
    fn publish(&self, topic: &str, payload: &LatestReading) -> Result<(), NotificationError> {
        self.tx
            .send(Notification {
                topic: topic.to_string(),
                payload: payload.clone(),
            })
            .map(|_| ())
            .map_err(|_| NotificationError::NoSubscribers(topic.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn payload(sensor_id: &str) -> LatestReading {
        LatestReading {
            sensor_id: sensor_id.to_string(),
            energy_kwh: dec!(1.5),
            voltage: dec!(221),
            recorded_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn publish_without_subscribers_reports_error() {
        let hub = BroadcastHub::new(8);
        let res = hub.publish(ALL_SENSORS_TOPIC, &payload("s-1"));
        assert_eq!(res, Err(NotificationError::NoSubscribers(ALL_SENSORS_TOPIC.to_string())));
    }

    #[tokio::test]
    async fn subscribers_only_see_their_topic() {
        let hub = BroadcastHub::new(8);
        let mut s1 = Box::pin(hub.subscribe(&sensor_topic("s-1")));

        hub.publish(&sensor_topic("s-2"), &payload("s-2")).unwrap();
        hub.publish(&sensor_topic("s-1"), &payload("s-1")).unwrap();

        let got = s1.next().await.unwrap();
        assert_eq!(got.sensor_id, "s-1");
    }

    #[test]
    fn sensor_topic_format() {
        assert_eq!(sensor_topic("abc"), "/topic/energy/abc");
    }
}
