pub mod aggregation;
pub mod analytics;
pub mod clock;
pub mod config;
pub mod counters;
pub mod ingest;
pub mod notify;
pub mod stores;

pub mod pipeline;
pub mod sources;
pub mod sinks;
pub mod transform;
pub mod observability;
pub mod metrics_server;

pub use aggregation::{HourlyBucket, ScanAggregator, StatsEngine, StatsSnapshot};
pub use analytics::{DailyTotals, EnergyAnalytics, Tariff};
pub use ingest::{IngestError, IngestHandle, IngestRequest, Ingestor};
pub use pipeline::{Envelope, Pipeline};
pub use stores::{StorageError, Stores};
