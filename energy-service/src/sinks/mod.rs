pub mod ingest;

pub use ingest::{IngestSink, SinkStats, SinkSummary};
