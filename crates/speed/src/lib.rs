//! Speed Layer.

pub mod consumer;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use trafficaqi_bus::{run_partition_consumer, BusConsumer};
use trafficaqi_store::StoreAdapter;

/// Spawn one consumer task per bus partition plus the periodic real-time
/// eviction task, all bound to `shutdown`. Each partition task is fully
/// independent — partitions carry no ordering relationship to each other, only
/// within themselves — so there is no coordination needed between them beyond
/// the shared shutdown signal.
#[allow(clippy::too_many_arguments)]
pub async fn run<C, S>(
    bus: Arc<C>,
    store: Arc<S>,
    topic: String,
    consumer_group: String,
    local_offset_hours: i32,
    idle_poll_interval: Duration,
    retention: Duration,
    eviction_interval: Duration,
    shutdown: tokio::sync::watch::Receiver<bool>,
) where
    C: BusConsumer + 'static,
    S: StoreAdapter + 'static,
{
    let partition_count = bus.partition_count(&topic);
    let mut handles = Vec::with_capacity(partition_count + 1);

    for partition in 0..partition_count {
        let bus = bus.clone();
        let store = store.clone();
        let topic = topic.clone();
        let group = consumer_group.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            run_partition_consumer(
                bus.as_ref(),
                &topic,
                partition,
                &group,
                idle_poll_interval,
                shutdown,
                |record| {
                    let store = store.clone();
                    async move { consumer::process_record(store.as_ref(), record, local_offset_hours).await }
                },
            )
            .await;
        }));
    }

    handles.push(tokio::spawn(run_eviction_loop(
        store,
        retention,
        eviction_interval,
        shutdown,
    )));

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "speed layer task panicked");
        }
    }
}

async fn run_eviction_loop<S: StoreAdapter>(
    store: Arc<S>,
    retention: Duration,
    interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let cutoff = Utc::now() - chrono::Duration::from_std(retention).unwrap_or_default();
                match store.evict_stale_realtime(cutoff).await {
                    Ok(evicted) if evicted > 0 => info!(evicted, "evicted stale realtime rows"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "realtime eviction failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
