use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;

use crate::{
    ingest::{IngestError, IngestRequest, Ingestor},
    pipeline::{Envelope, PipelineError, Sink},
};

/// Outcome tallies of one or more sink runs.
#[derive(Debug, Default)]
pub struct SinkStats {
    persisted: AtomicU64,
    counted: AtomicU64,
    unknown_sensor: AtomicU64,
    rejected: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkSummary {
    /// Readings durably stored.
    pub persisted: u64,
    /// Persisted readings whose counter update completed.
    pub counted: u64,
    pub unknown_sensor: u64,
    /// Items dropped before persisting (bad records, failed validation).
    pub rejected: u64,
}

impl SinkStats {
    pub fn summary(&self) -> SinkSummary {
        SinkSummary {
            persisted: self.persisted.load(Ordering::Relaxed),
            counted: self.counted.load(Ordering::Relaxed),
            unknown_sensor: self.unknown_sensor.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

fn shard_index(key: &str, workers: usize) -> usize {
    use std::hash::{Hash, Hasher};

    let mut h = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() as usize) % workers.max(1)
}

/// Feeds requests to an [`Ingestor`] from `workers` tasks.
///
/// Requests for one sensor always land on the same worker, so each sensor's
/// readings are ingested in arrival order.
pub struct IngestSink {
    ingestor: Ingestor,
    workers: usize,
    channel_capacity: usize,
    max_retries: u32,
    retry_backoff: Duration,
    stats: Arc<SinkStats>,
}

impl IngestSink {
    pub fn new(ingestor: Ingestor, workers: usize, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            ingestor,
            workers: workers.max(1),
            channel_capacity: 256,
            max_retries,
            retry_backoff,
            stats: Arc::new(SinkStats::default()),
        }
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn stats(&self) -> Arc<SinkStats> {
        self.stats.clone()
    }
}

struct Worker {
    ingestor: Ingestor,
    max_retries: u32,
    retry_backoff: Duration,
    stats: Arc<SinkStats>,
}

impl Worker {
    async fn handle(&self, env: Envelope<IngestRequest>) -> Result<(), PipelineError> {
        let sensor_id = env.payload.sensor_id.clone();

        // Only the persist step is retried: a failed persist leaves nothing behind.
        let mut attempt: u32 = 0;
        let handle = loop {
            match self.ingestor.ingest_async(env.payload.clone()).await {
                Ok(handle) => break handle,
                Err(IngestError::Storage(e)) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, sensor_id = %sensor_id, "persist failed, retrying with backoff");
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(IngestError::Storage(e)) => {
                    tracing::error!(error = %e, sensor_id = %sensor_id, "persist failed, giving up");
                    return Err(PipelineError::Sink(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, sensor_id = %sensor_id, "reading rejected");
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            }
        };
        self.stats.persisted.fetch_add(1, Ordering::Relaxed);

        match handle.completion().await {
            Ok(update) => {
                self.stats.counted.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    sensor_id = %sensor_id,
                    source = %update.source,
                    added_wh = update.added_wh,
                    total_wh = update.new_total_wh,
                    "reading counted"
                );
            }
            Err(IngestError::UnknownSensor(_)) => {
                self.stats.unknown_sensor.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                tracing::error!(error = %e, sensor_id = %sensor_id, "reading persisted but not counted");
            }
        }
        Ok(())
    }

    async fn run(self, mut rx: tokio_stream::wrappers::ReceiverStream<Envelope<IngestRequest>>) -> Result<(), PipelineError> {
        while let Some(env) = rx.next().await {
            self.handle(env).await?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Sink<IngestRequest> for IngestSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<IngestRequest>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut txs = Vec::with_capacity(self.workers);
        let mut joins = Vec::with_capacity(self.workers);

        for _ in 0..self.workers {
            let (tx, rx) = tokio::sync::mpsc::channel::<Envelope<IngestRequest>>(self.channel_capacity);
            txs.push(tx);

            let worker = Worker {
                ingestor: self.ingestor.clone(),
                max_retries: self.max_retries,
                retry_backoff: self.retry_backoff,
                stats: self.stats.clone(),
            };
            let stream = tokio_stream::wrappers::ReceiverStream::new(rx);
            joins.push(tokio::spawn(worker.run(stream)));
        }

        let mut result = Ok(());
        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping item from upstream pipeline");
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            let idx = shard_index(&env.payload.sensor_id, self.workers);
            if txs[idx].send(env).await.is_err() {
                // The worker stopped after exhausting retries; its join result says why.
                result = Err(PipelineError::Sink("ingest worker channel closed".to_string()));
                break;
            }
        }

        drop(txs);

        for j in joins {
            match j.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(PipelineError::Sink(format!("ingest worker join error: {e}"))),
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::FixedClock,
        counters::AtomicCounterStore,
        notify::BroadcastHub,
        stores::{MemoryCatalog, MemoryReadingStore, ReadingStore, StorageError},
    };
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use energy_client::{EnergySource, Reading, Sensor, SensorStatus};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicU32;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 10, 1, 3, 0, 0).unwrap()
    }

    fn catalog() -> Arc<MemoryCatalog> {
        Arc::new(MemoryCatalog::new(
            vec![
                Sensor::new("g1", "Menteng", EnergySource::Grid, SensorStatus::Active),
                Sensor::new("s1", "Menteng", EnergySource::Solar, SensorStatus::Active),
            ],
            vec![],
        ))
    }

    fn ingestor(readings: Arc<dyn ReadingStore>, counters: Arc<AtomicCounterStore>) -> Ingestor {
        Ingestor::new(
            readings,
            catalog(),
            counters,
            Arc::new(BroadcastHub::new(16)),
            Arc::new(FixedClock(now())),
            chrono_tz::Asia::Jakarta,
        )
    }

    fn items(reqs: Vec<Result<IngestRequest, PipelineError>>) -> impl futures::Stream<Item = Result<Envelope<IngestRequest>, PipelineError>> + Send + Unpin + 'static {
        futures::stream::iter(reqs.into_iter().map(|r| r.map(Envelope::now)))
    }

    #[test]
    fn shard_index_is_stable_and_in_range() {
        for workers in 1..8 {
            let a = shard_index("MTG-001", workers);
            assert_eq!(a, shard_index("MTG-001", workers));
            assert!(a < workers);
        }
        assert_eq!(shard_index("x", 0), 0);
    }

    #[tokio::test]
    async fn counts_known_and_skips_unknown_and_bad_items() {
        let readings = Arc::new(MemoryReadingStore::default());
        let counters = Arc::new(AtomicCounterStore::default());
        let sink = IngestSink::new(ingestor(readings.clone(), counters.clone()), 3, 0, Duration::ZERO);

        sink.run(items(vec![
            Ok(IngestRequest::new("g1", dec!(1.5), dec!(220))),
            Ok(IngestRequest::new("s1", dec!(0.25), dec!(221))),
            Ok(IngestRequest::new("ghost", dec!(9), dec!(220))),
            Ok(IngestRequest::new("g1", dec!(-1), dec!(220))),
            Err(PipelineError::Transform("bad record".to_string())),
            Ok(IngestRequest::new("g1", dec!(1), dec!(220))),
        ]))
        .await
        .unwrap();

        let summary = sink.stats().summary();
        assert_eq!(summary.persisted, 4);
        assert_eq!(summary.counted, 3);
        assert_eq!(summary.unknown_sensor, 1);
        assert_eq!(summary.rejected, 2);

        let day = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        assert_eq!(counters.total(day, EnergySource::Grid), 2500);
        assert_eq!(counters.total(day, EnergySource::Solar), 250);
        assert_eq!(readings.daily_total("ghost", day).await.unwrap(), dec!(9));
    }

    struct FlakyStore {
        inner: MemoryReadingStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl ReadingStore for FlakyStore {
        async fn insert(&self, reading: Reading) -> Result<Reading, StorageError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(StorageError::new("connection reset"));
            }
            self.inner.insert(reading).await
        }

        async fn find_by_sensor_and_date(&self, sensor_id: &str, date: NaiveDate) -> Result<Vec<Reading>, StorageError> {
            self.inner.find_by_sensor_and_date(sensor_id, date).await
        }

        async fn find_by_sensor_and_time_range(
            &self,
            sensor_id: &str,
            date: NaiveDate,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<Reading>, StorageError> {
            self.inner.find_by_sensor_and_time_range(sensor_id, date, start, end).await
        }

        async fn find_latest(&self, sensor_id: &str) -> Result<Option<Reading>, StorageError> {
            self.inner.find_latest(sensor_id).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_persist_then_succeeds() {
        let store = Arc::new(FlakyStore {
            inner: MemoryReadingStore::default(),
            failures_left: AtomicU32::new(2),
        });
        let counters = Arc::new(AtomicCounterStore::default());
        let sink = IngestSink::new(ingestor(store.clone(), counters.clone()), 1, 3, Duration::from_millis(100));

        sink.run(items(vec![Ok(IngestRequest::new("g1", dec!(2), dec!(220)))]))
            .await
            .unwrap();

        let day = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        assert_eq!(store.inner.find_by_sensor_and_date("g1", day).await.unwrap().len(), 1);
        assert_eq!(counters.total(day, EnergySource::Grid), 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_abort_the_run() {
        let store = Arc::new(FlakyStore {
            inner: MemoryReadingStore::default(),
            failures_left: AtomicU32::new(10),
        });
        let counters = Arc::new(AtomicCounterStore::default());
        let sink = IngestSink::new(ingestor(store, counters.clone()), 1, 2, Duration::from_millis(10));

        let res = sink
            .run(items(vec![Ok(IngestRequest::new("g1", dec!(2), dec!(220)))]))
            .await;

        assert!(matches!(res, Err(PipelineError::Sink(_))));
        assert_eq!(sink.stats().summary().persisted, 0);
        let day = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        assert_eq!(counters.total(day, EnergySource::Grid), 0);
    }
}
