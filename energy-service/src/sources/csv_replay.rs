use std::{fs::File, path::PathBuf};

use csv::StringRecord;

use crate::{
    ingest::IngestRequest,
    pipeline::{Envelope, EnvelopeStream, PipelineError, Source},
};

/// Replays recorded readings from a CSV file.
///
/// Expected header columns (by name): `sensor_id`, `energy_kwh`, `voltage`.
/// A record that fails to parse is yielded as an error item and the replay
/// moves on to the next one; failing to open the file ends the stream.
pub struct CsvReplaySource {
    path: PathBuf,
}

impl CsvReplaySource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn record_to_request(record: &StringRecord, headers: &StringRecord) -> Result<IngestRequest, PipelineError> {
    let get = |name: &str| -> Result<&str, PipelineError> {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .and_then(|idx| record.get(idx))
            .ok_or_else(|| PipelineError::Source(format!("missing column '{name}' in CSV record")))
    };

    let sensor_id = get("sensor_id")?.trim();
    IngestRequest::parse(sensor_id, get("energy_kwh")?, get("voltage")?)
        .map_err(|e| PipelineError::Transform(e.to_string()))
}

#[async_trait::async_trait]
impl Source<IngestRequest> for CsvReplaySource {
    async fn stream(&self) -> EnvelopeStream<IngestRequest> {
        let path = self.path.clone();
        let s = async_stream::stream! {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open {}: {e}", path.display())));
                    return;
                }
            };
            let mut rdr = csv::Reader::from_reader(file);
            let headers = match rdr.headers() {
                Ok(h) => h.clone(),
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to read CSV headers: {e}")));
                    return;
                }
            };

            for result in rdr.records() {
                let item = result
                    .map_err(|e| PipelineError::Source(format!("failed to read CSV record: {e}")))
                    .and_then(|record| record_to_request(&record, &headers));

                if item.is_err() {
                    metrics::counter!("energy_replay_parse_errors_total").increment(1);
                }
                yield item.map(Envelope::now);
            }
        };

        Box::pin(s)
    }
}
