//! Speed Layer consumer.
//!
//! One task per bus partition, since `InMemoryBus` guarantees ordering only
//! within a partition.

use chrono::Utc;
use tracing::warn;

use trafficaqi_bus::{BusError, BusRecord};
use trafficaqi_core::time::{local_date, local_hour};
use trafficaqi_core::{LocationSample, RealtimeRow};
use trafficaqi_store::StoreAdapter;

/// Handle one decoded [`LocationSample`]: upsert the real-time row, then fold
/// it into the hour's running average — but only on a fresh insert. A
/// redelivered record (retried after an ack timeout or a crash) would
/// otherwise double-count the same observation into the hourly average,
/// which [`StoreAdapter::upsert_realtime`]'s insert-vs-overwrite signal exists
/// to prevent.
pub async fn process_record<S: StoreAdapter>(
    store: &S,
    record: BusRecord,
    local_offset_hours: i32,
) -> Result<(), BusError> {
    let sample: LocationSample = record
        .decode_json()
        .map_err(|e| BusError::Decode(e.to_string()))?;

    let row = RealtimeRow::from_sample(&sample, Utc::now());
    let is_fresh = store
        .upsert_realtime(&row)
        .await
        .map_err(|e| BusError::Consume(e.to_string()))?;

    if !is_fresh {
        warn!(
            location = %sample.location,
            timestamp = %sample.timestamp,
            "redelivered sample — realtime row overwritten, hourly aggregation left untouched"
        );
        return Ok(());
    }

    let date = local_date(sample.timestamp, local_offset_hours);
    let hour = local_hour(sample.timestamp, local_offset_hours) as i32;
    store
        .upsert_hourly(
            date,
            hour,
            &sample.location,
            sample.traffic_level.map(|v| v as f64),
            sample.aqi_value.map(|v| v as f64),
            sample.is_peak_hour,
        )
        .await
        .map_err(|e| BusError::Consume(e.to_string()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use trafficaqi_store::fake::InMemoryStore;

    fn sample() -> LocationSample {
        LocationSample::build(
            Utc::now(),
            "A",
            0.0,
            0.0,
            Some(40),
            Some(3),
            7,
            &[6, 7, 8, 9, 16, 17, 18, 19],
        )
        .unwrap()
    }

    fn record_for(sample: &LocationSample) -> BusRecord {
        BusRecord {
            topic: "traffic-aqi-data".into(),
            partition: 0,
            offset: 0,
            key: "A".into(),
            payload: serde_json::to_vec(sample).unwrap(),
            published_at: Utc::now(),
            attempt_count: 0,
        }
    }

    #[tokio::test]
    async fn fresh_insert_updates_hourly_aggregation() {
        let store = InMemoryStore::new();
        let sample = sample();
        process_record(&store, record_for(&sample), 7).await.unwrap();
        assert_eq!(store.upsert_realtime_call_count(), 1);
        assert_eq!(store.upsert_hourly_call_count(), 1);
    }

    #[tokio::test]
    async fn redelivered_record_skips_hourly_update() {
        let store = InMemoryStore::new();
        let sample = sample();
        // Seed the realtime row that this exact (location, timestamp) would
        // already have produced, so the next upsert sees it as a redelivery.
        store.seed_realtime(vec![RealtimeRow::from_sample(&sample, Utc::now())]);

        process_record(&store, record_for(&sample), 7).await.unwrap();
        assert_eq!(store.upsert_realtime_call_count(), 1);
        assert_eq!(store.upsert_hourly_call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let store = InMemoryStore::new();
        let mut record = record_for(&sample());
        record.payload = b"not json".to_vec();
        let err = process_record(&store, record, 7).await.unwrap_err();
        assert!(matches!(err, BusError::Decode(_)));
    }
}
