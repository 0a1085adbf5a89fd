use anyhow::Result;
use energy_service::{
    aggregation::{ScanAggregator, StatsEngine},
    analytics::EnergyAnalytics,
    clock::{Clock, SystemClock},
    config::AppConfig,
    ingest::Ingestor,
    metrics_server,
    notify::{BroadcastHub, ALL_SENSORS_TOPIC},
    observability,
    pipeline::Pipeline,
    sinks::IngestSink,
    sources::CsvReplaySource,
    stores::Stores,
    transform::ReadingValidation,
};
use futures::StreamExt;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let zones = cfg.energy.zones()?;
    let stores = Stores::connect(&cfg.storage, &cfg.catalog).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let hub = Arc::new(BroadcastHub::new(cfg.live_updates.capacity));
    let mut live = Box::pin(hub.subscribe(ALL_SENSORS_TOPIC));
    tokio::spawn(async move {
        while let Some(update) = live.next().await {
            tracing::debug!(
                sensor_id = %update.sensor_id,
                energy_kwh = %update.energy_kwh,
                voltage = %update.voltage,
                "live update"
            );
        }
    });

    let ingestor = Ingestor::new(
        stores.readings.clone(),
        stores.catalog.clone(),
        stores.counters.clone(),
        hub.clone(),
        clock.clone(),
        zones.counter_zone,
    )
    .with_catalog_timeout(cfg.ingest.catalog_timeout());

    if let Some(replay) = &cfg.replay {
        let sink = IngestSink::new(
            ingestor.clone(),
            cfg.ingest.workers,
            cfg.ingest.max_retries,
            cfg.ingest.retry_backoff(),
        )
        .with_channel_capacity(cfg.ingest.channel_capacity);
        let stats = sink.stats();

        tracing::info!(path = %replay.path, workers = cfg.ingest.workers, "replaying readings");
        let run = Pipeline::new(CsvReplaySource::new(&replay.path), sink)
            .with_transform(Arc::new(ReadingValidation))
            .run()
            .await?;

        let summary = stats.summary();
        tracing::info!(
            delivered = run.delivered,
            failed = run.failed,
            persisted = summary.persisted,
            counted = summary.counted,
            unknown_sensor = summary.unknown_sensor,
            rejected = summary.rejected,
            "replay finished"
        );
    }

    let analytics = EnergyAnalytics::new(stores.counters.clone(), clock.clone(), zones.counter_zone, cfg.energy.tariff());
    let engine = StatsEngine::new(
        stores.catalog.clone(),
        Arc::new(ScanAggregator::new(stores.readings.clone())),
        clock,
        zones,
    );

    let today = analytics.today_snapshot().await?;
    let city = engine.city_stats().await?;
    tracing::info!(
        date = %today.totals.date,
        grid_kwh = %today.totals.grid_kwh,
        solar_kwh = %today.totals.solar_kwh,
        savings = today.savings,
        grid_cost = today.grid_cost,
        emissions_kg = today.emissions_kg,
        "energy today"
    );
    tracing::info!(
        sensors = city.sensor_count,
        active = city.active_sensor_count,
        total_kwh = %city.total_kwh,
        solar_ratio_percent = %city.solar_ratio_percent,
        avg_voltage = %city.avg_voltage,
        "city stats"
    );

    if cfg.metrics.is_some() {
        tracing::info!("serving metrics until interrupted");
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
