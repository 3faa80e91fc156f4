//! Batch Layer.

pub mod jobs;
pub mod scheduler;

use std::sync::Arc;

use tracing::warn;
use trafficaqi_store::StoreAdapter;

/// Spawn the three cron-scheduled jobs concurrently, each its own sequential
/// loop (see [`scheduler::run_cron_loop`]) bound to the shared `shutdown` signal.
pub async fn run<S: StoreAdapter + 'static>(
    store: Arc<S>,
    hourly_minute: u32,
    daily_hour_local: u32,
    peak_hour_local: u32,
    local_offset_hours: i32,
    peak_hours_local: Vec<u32>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let hourly_cron = format!("{hourly_minute} * * * *");
    let daily_cron = format!("0 {daily_hour_local} * * *");
    let peak_cron = format!("0 {peak_hour_local} * * *");

    let hourly_store = store.clone();
    let hourly_shutdown = shutdown.clone();
    let hourly_peak_hours = peak_hours_local.clone();
    let hourly = tokio::spawn(async move {
        scheduler::run_cron_loop("batch-hourly", &hourly_cron, hourly_shutdown, || {
            let store = hourly_store.clone();
            let peak_hours = hourly_peak_hours.clone();
            async move {
                if let Err(e) = jobs::run_hourly_job(store.as_ref(), local_offset_hours, &peak_hours).await {
                    warn!(error = %e, "hourly job failed");
                }
            }
        })
        .await;
    });

    let daily_store = store.clone();
    let daily_shutdown = shutdown.clone();
    let daily = tokio::spawn(async move {
        scheduler::run_cron_loop("batch-daily", &daily_cron, daily_shutdown, || {
            let store = daily_store.clone();
            async move {
                if let Err(e) = jobs::run_daily_job(store.as_ref(), local_offset_hours).await {
                    warn!(error = %e, "daily job failed");
                }
            }
        })
        .await;
    });

    let peak_store = store;
    let peak_shutdown = shutdown;
    let peak = tokio::spawn(async move {
        scheduler::run_cron_loop("batch-peak-hour", &peak_cron, peak_shutdown, || {
            let store = peak_store.clone();
            async move {
                if let Err(e) = jobs::run_peak_hour_job(store.as_ref(), local_offset_hours).await {
                    warn!(error = %e, "peak-hour job failed");
                }
            }
        })
        .await;
    });

    for handle in [hourly, daily, peak] {
        if let Err(e) = handle.await {
            warn!(error = %e, "batch job task panicked");
        }
    }
}
