use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    ingest::IngestRequest,
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
};

/// Producer half handed to whatever accepts readings from the outside world.
#[derive(Clone)]
pub struct ReadingSender {
    tx: mpsc::Sender<Envelope<IngestRequest>>,
}

impl ReadingSender {
    pub async fn send(&self, req: IngestRequest) -> Result<(), PipelineError> {
        self.tx
            .send(Envelope::now(req))
            .await
            .map_err(|_| PipelineError::Source("reading channel closed".to_string()))
    }
}

/// Single-consumer source fed through a bounded mpsc channel.
#[derive(Clone)]
pub struct ChannelSource {
    receiver: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<Envelope<IngestRequest>>>>>,
}

impl ChannelSource {
    pub fn new(channel_capacity: usize) -> (Self, ReadingSender) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let source = Self {
            receiver: Arc::new(tokio::sync::Mutex::new(Some(rx))),
        };
        (source, ReadingSender { tx })
    }
}

#[async_trait::async_trait]
impl Source<IngestRequest> for ChannelSource {
    async fn stream(&self) -> EnvelopeStream<IngestRequest> {
        let mut guard = self.receiver.lock().await;
        match guard.take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).map(Ok)),
            None => Box::pin(futures::stream::once(async {
                Err(PipelineError::Source(
                    "channel source stream already taken; only one consumer supported".to_string(),
                ))
            })),
        }
    }
}
