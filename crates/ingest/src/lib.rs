pub mod poller;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

pub use poller::{IngestionPoller, PollerMetrics};

use trafficaqi_bus::BusProducer;
use trafficaqi_store::StoreAdapter;
use trafficaqi_upstream::{AqiClient, TrafficClient};

/// Drive the poller on its fixed tick until `shutdown` fires — the component
/// task the `pipeline` binary spawns. Ticks are never queued up: a tick that
/// lands while the previous cycle is still running is handled by
/// [`IngestionPoller::run_cycle`]'s own skip-and-count-lag guard.
pub async fn run<B, S, T, A>(
    poller: Arc<IngestionPoller<B, S, T, A>>,
    poll_interval: Duration,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) where
    B: BusProducer,
    S: StoreAdapter,
    T: TrafficClient,
    A: AqiClient,
{
    let mut ticker = tokio::time::interval(poll_interval);
    info!(interval_seconds = poll_interval.as_secs(), "ingestion poller started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poller.run_cycle().await;
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    warn!("ingestion poller stopped");
}
