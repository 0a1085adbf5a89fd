use anyhow::{Context, Result};
use chrono::NaiveDate;
use energy_service::{
    aggregation::{HourlyBucket, ScanAggregator, StatsEngine, StatsSnapshot},
    analytics::{AnalyticsSnapshot, EnergyAnalytics},
    clock::{date_in, Clock, SystemClock},
    config::AppConfig,
    observability,
    stores::Stores,
};
use serde::Serialize;
use std::{collections::BTreeSet, sync::Arc};

#[derive(Serialize)]
struct Report {
    city: StatsSnapshot,
    districts: Vec<StatsSnapshot>,
    hourly_date: NaiveDate,
    hourly: Vec<HourlyBucket>,
    today: AnalyticsSnapshot,
}

/// Usage: `energy_report [YYYY-MM-DD]`
///
/// The date selects the hourly breakdown; it defaults to today in the
/// presentation zone. Everything else is for today.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let zones = cfg.energy.zones()?;
    let stores = Stores::connect(&cfg.storage, &cfg.catalog).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let hourly_date = match std::env::args().nth(1) {
        Some(arg) => NaiveDate::parse_from_str(&arg, "%Y-%m-%d").with_context(|| format!("invalid date '{arg}'"))?,
        None => date_in(zones.presentation_zone, clock.now()),
    };

    let analytics = EnergyAnalytics::new(stores.counters.clone(), clock.clone(), zones.counter_zone, cfg.energy.tariff());
    let engine = StatsEngine::new(
        stores.catalog.clone(),
        Arc::new(ScanAggregator::new(stores.readings.clone())),
        clock,
        zones,
    );

    // Districts with a profile or at least one sensor.
    let mut names: BTreeSet<String> = engine.district_profiles().await?.into_iter().map(|p| p.name).collect();
    names.extend(stores.catalog.find_all_sensors().await?.into_iter().map(|s| s.district));

    let mut districts = Vec::with_capacity(names.len());
    for name in &names {
        districts.push(engine.district_stats(name).await?);
    }

    let report = Report {
        city: engine.city_stats().await?,
        districts,
        hourly_date,
        hourly: engine.hourly_stats(hourly_date).await?,
        today: analytics.today_snapshot().await?,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
