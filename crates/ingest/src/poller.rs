//! Ingestion Poller.
//!
//! A tick loop with skip-if-previous-still-running semantics and a
//! semaphore-bounded fan-out across monitored locations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::warn;

use trafficaqi_bus::{BusError, BusProducer};
use trafficaqi_core::health::Heartbeat;
use trafficaqi_core::{LocationSample, MonitoredLocation, RawRecord};
use trafficaqi_store::StoreAdapter;
use trafficaqi_upstream::{AqiClient, TrafficClient, UpstreamError};

const UPSTREAM_RETRY_ATTEMPTS: u32 = 2;
const RAW_LOG_RETRY_ATTEMPTS: u32 = 3;

#[derive(Default)]
pub struct PollerMetrics {
    /// Incremented when a tick is skipped because the previous cycle is still running.
    pub lag_count: AtomicU64,
    /// Per-location count of cycles where neither upstream feed succeeded.
    pub location_failures: parking_lot_free::Counters,
}

/// A small hand-rolled counter table — not worth pulling in a concurrent-map
/// crate for a handful of per-location counters.
mod parking_lot_free {
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct Counters(Mutex<HashMap<String, u64>>);

    impl Counters {
        pub fn increment(&self, key: &str) {
            let mut map = self.0.lock().unwrap();
            *map.entry(key.to_string()).or_insert(0) += 1;
        }

        pub fn get(&self, key: &str) -> u64 {
            *self.0.lock().unwrap().get(key).unwrap_or(&0)
        }
    }
}

pub struct IngestionPoller<B, S, T, A> {
    bus: Arc<B>,
    store: Arc<S>,
    traffic_client: Arc<T>,
    aqi_client: Arc<A>,
    locations: Vec<MonitoredLocation>,
    bus_topic: String,
    upstream_timeout: Duration,
    fanout_concurrency: usize,
    local_offset_hours: i32,
    peak_hours_local: Vec<u32>,
    cycle_running: AtomicBool,
    pub metrics: PollerMetrics,
    pub heartbeat: Heartbeat,
}

impl<B, S, T, A> IngestionPoller<B, S, T, A>
where
    B: BusProducer,
    S: StoreAdapter,
    T: TrafficClient,
    A: AqiClient,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<B>,
        store: Arc<S>,
        traffic_client: Arc<T>,
        aqi_client: Arc<A>,
        locations: Vec<MonitoredLocation>,
        bus_topic: String,
        upstream_timeout: Duration,
        fanout_concurrency: usize,
        local_offset_hours: i32,
        peak_hours_local: Vec<u32>,
        poll_interval_seconds: u64,
    ) -> Self {
        Self {
            bus,
            store,
            traffic_client,
            aqi_client,
            locations,
            bus_topic,
            upstream_timeout,
            fanout_concurrency,
            local_offset_hours,
            peak_hours_local,
            cycle_running: AtomicBool::new(false),
            metrics: PollerMetrics::default(),
            heartbeat: Heartbeat::new(poll_interval_seconds),
        }
    }

    /// Run one cycle: step 1 (skip-if-running) lives in the caller's tick loop
    /// (see `bin/ingest-worker.rs`); this runs steps 2-7 for every location.
    pub async fn run_cycle(&self) {
        if self
            .cycle_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.metrics.lag_count.fetch_add(1, Ordering::Relaxed);
            warn!("ingestion cycle skipped — previous cycle still running");
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.fanout_concurrency));
        let mut handles = Vec::with_capacity(self.locations.len());

        for location in &self.locations {
            let semaphore = semaphore.clone();
            let traffic_client = self.traffic_client.clone();
            let aqi_client = self.aqi_client.clone();
            let timeout = self.upstream_timeout;
            let location = location.clone();

            handles.push(tokio::spawn(async move {
                let _traffic_permit = semaphore.clone().acquire_owned().await;
                let traffic = fetch_with_retry(UPSTREAM_RETRY_ATTEMPTS, timeout, || {
                    let client = traffic_client.clone();
                    let loc = location.name.clone();
                    async move {
                        let deadline = Instant::now() + timeout;
                        client.fetch_traffic(&loc, deadline).await
                    }
                })
                .await;
                drop(_traffic_permit);

                let _aqi_permit = semaphore.acquire_owned().await;
                let aqi = fetch_with_retry(UPSTREAM_RETRY_ATTEMPTS, timeout, || {
                    let client = aqi_client.clone();
                    let loc = location.name.clone();
                    async move {
                        let deadline = Instant::now() + timeout;
                        client.fetch_aqi(&loc, deadline).await
                    }
                })
                .await;

                (location, traffic, aqi)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((location, traffic, aqi)) => {
                    self.handle_location_result(location, traffic, aqi).await;
                }
                Err(e) => warn!(error = %e, "ingestion worker task panicked"),
            }
        }

        self.heartbeat.beat();
        self.cycle_running.store(false, Ordering::SeqCst);
    }

    async fn handle_location_result(
        &self,
        location: MonitoredLocation,
        traffic: Result<i32, UpstreamError>,
        aqi: Result<i32, UpstreamError>,
    ) {
        let traffic_value = traffic.ok();
        let aqi_value = aqi.ok();

        let Some(sample) = LocationSample::build(
            Utc::now(),
            location.name.clone(),
            location.latitude,
            location.longitude,
            aqi_value,
            traffic_value,
            self.local_offset_hours,
            &self.peak_hours_local,
        ) else {
            self.metrics.location_failures.increment(&location.name);
            warn!(location = %location.name, "neither feed succeeded this cycle — skipping location");
            return;
        };

        self.emit(sample).await;
    }

    async fn emit(&self, sample: LocationSample) {
        let payload = match serde_json::to_vec(&sample) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(location = %sample.location, error = %e, "failed to encode sample — dropping");
                return;
            }
        };

        match self.bus.publish(&self.bus_topic, &sample.location, payload).await {
            Ok(()) => {}
            Err(e @ BusError::PermanentPublishFailure(_)) => {
                warn!(location = %sample.location, error = %e, "permanent publish failure — falling back to raw log only");
            }
            Err(e) => {
                warn!(location = %sample.location, error = %e, "bus publish failed — falling back to raw log only");
            }
        }

        let record = RawRecord::from_sample(&sample, Utc::now());
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.append_raw(&record).await {
                Ok(()) => break,
                Err(e) if attempt < RAW_LOG_RETRY_ATTEMPTS => {
                    warn!(location = %sample.location, attempt, error = %e, "raw log append failed — retrying");
                    tokio::time::sleep(Duration::from_millis(100 * attempt as u64)).await;
                }
                Err(e) => {
                    warn!(location = %sample.location, error = %e, "raw log append failed permanently — dropping sample");
                    break;
                }
            }
        }
    }
}

async fn fetch_with_retry<F, Fut>(attempts: u32, _timeout: Duration, mut f: F) -> Result<i32, UpstreamError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<i32, UpstreamError>>,
{
    let mut last_err = UpstreamError::Transient("no attempts made".into());
    for attempt in 0..=attempts {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                last_err = e;
                continue;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trafficaqi_bus::InMemoryBus;
    use trafficaqi_store::fake::InMemoryStore;
    use trafficaqi_upstream::fake::FakeUpstreamClient;

    fn locations() -> Vec<MonitoredLocation> {
        vec![MonitoredLocation {
            name: "A".into(),
            latitude: -6.2,
            longitude: 106.8,
        }]
    }

    #[tokio::test]
    async fn cycle_emits_sample_when_both_feeds_succeed() {
        let fake = Arc::new(FakeUpstreamClient::new());
        fake.set_traffic("A", Ok(2));
        fake.set_aqi("A", Ok(45));

        let bus = Arc::new(InMemoryBus::new(1, Duration::from_secs(5)));
        let store = Arc::new(InMemoryStore::new());

        let poller = IngestionPoller::new(
            bus.clone(),
            store,
            fake.clone(),
            fake,
            locations(),
            "traffic-aqi-data".into(),
            Duration::from_secs(1),
            8,
            7,
            vec![6, 7, 8, 9, 16, 17, 18, 19],
            15,
        );
        poller.run_cycle().await;
        assert_eq!(poller.metrics.location_failures.get("A"), 0);
    }

    #[tokio::test]
    async fn cycle_records_failure_when_both_feeds_fail() {
        let fake = Arc::new(FakeUpstreamClient::new());
        // no fixtures registered — both calls fall back to transient errors.

        let bus = Arc::new(InMemoryBus::new(1, Duration::from_secs(5)));
        let store = Arc::new(InMemoryStore::new());

        let poller = IngestionPoller::new(
            bus,
            store,
            fake.clone(),
            fake,
            locations(),
            "traffic-aqi-data".into(),
            Duration::from_millis(50),
            8,
            7,
            vec![6, 7, 8, 9, 16, 17, 18, 19],
            15,
        );
        poller.run_cycle().await;
        assert_eq!(poller.metrics.location_failures.get("A"), 1);
    }

    #[tokio::test]
    async fn overlapping_cycle_is_skipped_and_counted_as_lag() {
        let fake = Arc::new(FakeUpstreamClient::new());
        fake.set_traffic("A", Ok(2));
        fake.set_aqi("A", Ok(45));
        let bus = Arc::new(InMemoryBus::new(1, Duration::from_secs(5)));
        let store = Arc::new(InMemoryStore::new());

        let poller = Arc::new(IngestionPoller::new(
            bus,
            store,
            fake.clone(),
            fake,
            locations(),
            "traffic-aqi-data".into(),
            Duration::from_secs(1),
            8,
            7,
            vec![6, 7, 8, 9, 16, 17, 18, 19],
            15,
        ));
        poller.cycle_running.store(true, Ordering::SeqCst);
        poller.run_cycle().await;
        assert_eq!(poller.metrics.lag_count.load(Ordering::Relaxed), 1);
    }
}
