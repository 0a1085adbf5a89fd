use crate::{
    ingest::IngestRequest,
    pipeline::{Envelope, PipelineError, Transform},
};

/// Pure validation of an incoming reading.
///
/// Rules:
/// - sensor id must be present.
/// - energy (kWh) and voltage must be non-negative.
pub fn validate_reading(env: Envelope<IngestRequest>) -> Result<Envelope<IngestRequest>, PipelineError> {
    env.payload
        .validate()
        .map_err(|e| PipelineError::Transform(e.to_string()))?;
    Ok(env)
}

#[derive(Clone, Default)]
pub struct ReadingValidation;

#[async_trait::async_trait]
impl Transform<IngestRequest, IngestRequest> for ReadingValidation {
    async fn apply(&self, input: Envelope<IngestRequest>) -> Result<Envelope<IngestRequest>, PipelineError> {
        let sensor_id = input.payload.sensor_id.clone();
        validate_reading(input).inspect_err(|e| {
            tracing::warn!(error = %e, sensor_id = %sensor_id, "reading rejected");
            metrics::counter!("validation_reading_rejected_total").increment(1);
        })
    }
}
