//! Source → transforms → sink plumbing for batches of readings.
//!
//! Errors travel down the stream next to good items; the sink decides which
//! of them end a run.

use std::{
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use tracing::Instrument;

#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: DateTime<Utc>,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// What reached the sink in one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub delivered: u64,
    pub failed: u64,
}

/// A source feeding a sink through same-type transforms, applied in order.
pub struct Pipeline<S, T, K> {
    source: S,
    transforms: Vec<Arc<dyn Transform<T, T>>>,
    sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub fn new(source: S, sink: K) -> Self {
        Self {
            source,
            transforms: Vec::new(),
            sink,
        }
    }

    pub fn with_transform(mut self, t: Arc<dyn Transform<T, T>>) -> Self {
        self.transforms.push(t);
        self
    }

    /// Drive the source to completion. A sink error ends the run; item
    /// errors are only counted here.
    pub async fn run(self) -> Result<RunSummary, PipelineError> {
        let span = tracing::info_span!("pipeline", transforms = self.transforms.len());

        async move {
            let mut stream = self.source.stream().await;

            // A failed item skips the remaining transforms.
            for t in self.transforms {
                stream = Box::pin(stream.then(move |item| {
                    let t = t.clone();
                    async move {
                        match item {
                            Ok(env) => t.apply(env).await,
                            Err(e) => Err(e),
                        }
                    }
                }));
            }

            let delivered = Arc::new(AtomicU64::new(0));
            let failed = Arc::new(AtomicU64::new(0));
            let counted = {
                let (delivered, failed) = (delivered.clone(), failed.clone());
                stream.inspect(move |item| {
                    let counter = if item.is_ok() { &delivered } else { &failed };
                    counter.fetch_add(1, Ordering::Relaxed);
                })
            };

            self.sink.run(counted).await?;

            let summary = RunSummary {
                delivered: delivered.load(Ordering::Relaxed),
                failed: failed.load(Ordering::Relaxed),
            };
            tracing::info!(delivered = summary.delivered, failed = summary.failed, "pipeline drained");
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    struct Fixed(Vec<Result<String, String>>);

    #[async_trait::async_trait]
    impl Source<String> for Fixed {
        async fn stream(&self) -> EnvelopeStream<String> {
            let items: Vec<_> = self
                .0
                .iter()
                .cloned()
                .map(|r| r.map(Envelope::now).map_err(PipelineError::Source))
                .collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    struct Suffix(&'static str);

    #[async_trait::async_trait]
    impl Transform<String, String> for Suffix {
        async fn apply(&self, mut input: Envelope<String>) -> Result<Envelope<String>, PipelineError> {
            if input.payload.is_empty() {
                return Err(PipelineError::Transform("empty sensor id".to_string()));
            }
            input.payload.push_str(self.0);
            Ok(input)
        }
    }

    #[derive(Default, Clone)]
    struct Collect {
        seen: Arc<Mutex<Vec<Result<String, String>>>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Sink<String> for Collect {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<String>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                self.seen.lock().await.push(item.map(|e| e.payload).map_err(|e| e.to_string()));
            }
            if self.fail {
                return Err(PipelineError::Sink("store offline".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn transforms_run_in_order_and_errors_reach_the_sink() {
        let sink = Collect::default();
        let source = Fixed(vec![
            Ok("MTG-001".to_string()),
            Err("bad CSV row".to_string()),
            Ok(String::new()),
            Ok("KMY-001".to_string()),
        ]);

        let summary = Pipeline::new(source, sink.clone())
            .with_transform(Arc::new(Suffix(":checked")))
            .with_transform(Arc::new(Suffix(":routed")))
            .run()
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { delivered: 2, failed: 2 });
        let seen = sink.seen.lock().await;
        assert_eq!(seen[0], Ok("MTG-001:checked:routed".to_string()));
        assert_eq!(seen[1], Err("source error: bad CSV row".to_string()));
        assert_eq!(seen[2], Err("transform error: empty sensor id".to_string()));
        assert_eq!(seen[3], Ok("KMY-001:checked:routed".to_string()));
    }

    #[tokio::test]
    async fn sink_failure_fails_the_run() {
        let sink = Collect {
            fail: true,
            ..Collect::default()
        };
        let res = Pipeline::new(Fixed(vec![Ok("MTG-001".to_string())]), sink.clone())
            .run()
            .await;

        assert!(matches!(res, Err(PipelineError::Sink(_))));
        assert_eq!(sink.seen.lock().await.len(), 1);
    }
}
