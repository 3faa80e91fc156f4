//! pipeline — the traffic/AQI lambda pipeline's single deployable process.
//!
//! Constructs the shared `PgStore` and `InMemoryBus` once, then spawns the
//! Ingestion Poller, the Speed Layer, the Batch Layer's scheduled jobs, and
//! the Serving Layer's HTTP surface as cooperating tasks under one shutdown
//! signal, since the bus is in-process shared state (see DESIGN.md).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use trafficaqi_core::{MonitoredLocation, PipelineConfig};
use trafficaqi_store::PgStore;
use trafficaqi_upstream::{HttpAqiClient, HttpTrafficClient};

#[derive(Parser, Debug)]
#[command(name = "pipeline", version, about)]
struct Cli {
    /// Address the Serving Layer's HTTP surface binds to.
    #[arg(long, env = "SERVING_HTTP_ADDR", default_value = "0.0.0.0:8080")]
    http_addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    trafficaqi_core::config::load_dotenv();
    let config = PipelineConfig::from_env()?;
    config.log_summary();

    let pool = trafficaqi_store::pg::connect(
        &config.postgres.connection_string(),
        &config.postgres.masked_connection_string(),
        config.postgres.max_connections,
    )
    .await?;
    let store = Arc::new(PgStore::new(pool));

    for location in &config.locations {
        store
            .upsert_monitored_location(&MonitoredLocation {
                name: location.name.clone(),
                latitude: location.latitude,
                longitude: location.longitude,
            })
            .await?;
    }
    let locations: Vec<MonitoredLocation> = config
        .locations
        .iter()
        .map(|l| MonitoredLocation {
            name: l.name.clone(),
            latitude: l.latitude,
            longitude: l.longitude,
        })
        .collect();

    let bus = Arc::new(trafficaqi_bus::InMemoryBus::new(
        locations.len().max(1),
        Duration::from_secs(config.upstream_timeout_seconds.max(5)),
    ));

    let traffic_client = Arc::new(HttpTrafficClient::new(
        config.upstream.traffic_base_url.clone(),
        config.upstream.api_key.clone(),
    ));
    let aqi_client = Arc::new(HttpAqiClient::new(
        config.upstream.aqi_base_url.clone(),
        config.upstream.api_key.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let poller = Arc::new(trafficaqi_ingest::IngestionPoller::new(
        bus.clone(),
        store.clone(),
        traffic_client,
        aqi_client,
        locations,
        config.bus_topic.clone(),
        Duration::from_secs(config.upstream_timeout_seconds),
        config.fanout_concurrency as usize,
        config.local_offset_hours,
        config.peak_hours_local.clone(),
        config.poll_interval_seconds,
    ));

    let serving = Arc::new(trafficaqi_serving::ServingLayer::new(store.clone()));
    let router = trafficaqi_serving::http::build_router(serving);

    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(trafficaqi_ingest::run(
        poller,
        Duration::from_secs(config.poll_interval_seconds),
        shutdown_rx.clone(),
    )));

    tasks.push(tokio::spawn(trafficaqi_speed::run(
        bus,
        store.clone(),
        config.bus_topic.clone(),
        config.consumer_group.clone(),
        config.local_offset_hours,
        Duration::from_millis(200),
        Duration::from_secs(config.realtime_retention_seconds),
        Duration::from_secs(config.realtime_eviction_interval_seconds),
        shutdown_rx.clone(),
    )));

    tasks.push(tokio::spawn(trafficaqi_batch::run(
        store,
        config.batch_hourly_minute,
        config.batch_daily_hour_local,
        config.batch_peak_hour_local,
        config.local_offset_hours,
        config.peak_hours_local.clone(),
        shutdown_rx.clone(),
    )));

    let http_addr = cli.http_addr;
    let http_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = trafficaqi_serving::http::serve(router, http_addr, http_shutdown).await {
            warn!(error = %e, "serving layer http surface exited with an error");
        }
    }));

    info!("pipeline started");
    shutdown_signal().await;
    warn!(
        grace_seconds = config.shutdown_grace_seconds,
        "shutdown signal received, waiting for components to drain"
    );
    let _ = shutdown_tx.send(true);

    let grace = Duration::from_secs(config.shutdown_grace_seconds);
    let hard = Duration::from_secs(config.shutdown_hard_seconds);
    let drain = async move {
        for task in tasks {
            let _ = task.await;
        }
    };
    tokio::pin!(drain);

    if tokio::time::timeout(grace, drain.as_mut()).await.is_err() {
        warn!("grace period elapsed, components still draining — waiting out the hard deadline");
        if tokio::time::timeout(hard.saturating_sub(grace), drain.as_mut()).await.is_err() {
            warn!("hard deadline elapsed — exiting without a full drain");
        }
    }

    info!("pipeline exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
