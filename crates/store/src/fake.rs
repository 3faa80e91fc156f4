//! Deterministic in-memory fake for [`StoreAdapter`], for use by every other
//! crate's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use trafficaqi_core::{
    DailyAggregation, HourlyAggregation, MonitoredLocation, PeakHourSummary, RawRecord,
    RealtimeRow,
};

use crate::{StoreAdapter, StoreError};

/// Mutex/HashMap-backed stand-in for [`crate::PgStore`]. Tracks call counts for
/// `upsert_realtime`/`upsert_hourly` so callers can assert on redelivery
/// handling without a database.
#[derive(Default)]
pub struct InMemoryStore {
    raw: Mutex<Vec<RawRecord>>,
    realtime: Mutex<HashMap<(String, DateTime<Utc>), RealtimeRow>>,
    hourly: Mutex<HashMap<(NaiveDate, i32, String), HourlyAggregation>>,
    daily: Mutex<Vec<DailyAggregation>>,
    peak: Mutex<HashMap<NaiveDate, PeakHourSummary>>,
    monitored_locations: Mutex<HashMap<String, MonitoredLocation>>,
    upsert_realtime_calls: AtomicU32,
    upsert_hourly_calls: AtomicU32,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_realtime(&self, rows: Vec<RealtimeRow>) {
        let mut realtime = self.realtime.lock().unwrap();
        for row in rows {
            realtime.insert((row.location.clone(), row.timestamp), row);
        }
    }

    pub fn seed_hourly(&self, rows: Vec<HourlyAggregation>) {
        let mut hourly = self.hourly.lock().unwrap();
        for row in rows {
            hourly.insert((row.date, row.hour, row.location.clone()), row);
        }
    }

    pub fn seed_raw(&self, rows: Vec<RawRecord>) {
        self.raw.lock().unwrap().extend(rows);
    }

    pub fn upsert_realtime_call_count(&self) -> u32 {
        self.upsert_realtime_calls.load(Ordering::SeqCst)
    }

    pub fn upsert_hourly_call_count(&self) -> u32 {
        self.upsert_hourly_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStore {
    async fn append_raw(&self, record: &RawRecord) -> Result<(), StoreError> {
        self.raw.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn upsert_realtime(&self, row: &RealtimeRow) -> Result<bool, StoreError> {
        self.upsert_realtime_calls.fetch_add(1, Ordering::SeqCst);
        let mut realtime = self.realtime.lock().unwrap();
        let key = (row.location.clone(), row.timestamp);
        let is_fresh = !realtime.contains_key(&key);
        realtime.insert(key, row.clone());
        Ok(is_fresh)
    }

    async fn evict_stale_realtime(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut realtime = self.realtime.lock().unwrap();
        let before = realtime.len();
        realtime.retain(|_, row| row.processing_timestamp >= cutoff);
        Ok((before - realtime.len()) as u64)
    }

    async fn upsert_hourly(
        &self,
        date: NaiveDate,
        hour: i32,
        location: &str,
        traffic_sample: Option<f64>,
        aqi_sample: Option<f64>,
        is_peak_hour: bool,
    ) -> Result<(), StoreError> {
        self.upsert_hourly_calls.fetch_add(1, Ordering::SeqCst);
        let mut hourly = self.hourly.lock().unwrap();
        let key = (date, hour, location.to_string());
        let entry = hourly.entry(key).or_insert_with(|| HourlyAggregation {
            date,
            hour,
            location: location.to_string(),
            avg_traffic_level: None,
            avg_aqi_value: None,
            traffic_sample_count: 0,
            aqi_sample_count: 0,
            total_records: 0,
            is_peak_hour,
            updated_at: Utc::now(),
        });

        if let Some(sample) = traffic_sample {
            let running = entry.avg_traffic_level.unwrap_or(0.0) * entry.traffic_sample_count as f64;
            entry.traffic_sample_count += 1;
            entry.avg_traffic_level = Some((running + sample) / entry.traffic_sample_count as f64);
        }
        if let Some(sample) = aqi_sample {
            let running = entry.avg_aqi_value.unwrap_or(0.0) * entry.aqi_sample_count as f64;
            entry.aqi_sample_count += 1;
            entry.avg_aqi_value = Some((running + sample) / entry.aqi_sample_count as f64);
        }
        entry.total_records += 1;
        entry.is_peak_hour = is_peak_hour;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn write_hourly_authoritative(&self, row: &HourlyAggregation) -> Result<(), StoreError> {
        self.hourly
            .lock()
            .unwrap()
            .insert((row.date, row.hour, row.location.clone()), row.clone());
        Ok(())
    }

    async fn write_daily(&self, record: &DailyAggregation) -> Result<(), StoreError> {
        self.daily.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn write_peak(&self, record: &PeakHourSummary) -> Result<(), StoreError> {
        self.peak.lock().unwrap().insert(record.analysis_date, record.clone());
        Ok(())
    }

    async fn fetch_recent_realtime(&self, max_age: Duration) -> Result<Vec<RealtimeRow>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        Ok(self
            .realtime
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.processing_timestamp >= cutoff)
            .cloned()
            .collect())
    }

    async fn fetch_hourly(&self, days: i64) -> Result<Vec<HourlyAggregation>, StoreError> {
        let cutoff = Utc::now().date_naive() - chrono::Duration::days(days);
        Ok(self
            .hourly
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.date >= cutoff)
            .cloned()
            .collect())
    }

    async fn fetch_hourly_for_date(&self, date: NaiveDate) -> Result<Vec<HourlyAggregation>, StoreError> {
        Ok(self
            .hourly
            .lock()
            .unwrap()
            .values()
            .filter(|row| row.date == date)
            .cloned()
            .collect())
    }

    async fn fetch_peak_summary(&self, date: NaiveDate) -> Result<Option<PeakHourSummary>, StoreError> {
        Ok(self.peak.lock().unwrap().get(&date).cloned())
    }

    async fn fetch_latest_raw_per_location(&self) -> Result<Vec<RawRecord>, StoreError> {
        let raw = self.raw.lock().unwrap();
        let mut latest: HashMap<String, RawRecord> = HashMap::new();
        for record in raw.iter() {
            latest
                .entry(record.location.clone())
                .and_modify(|existing| {
                    if record.timestamp > existing.timestamp {
                        *existing = record.clone();
                    }
                })
                .or_insert_with(|| record.clone());
        }
        Ok(latest.into_values().collect())
    }

    async fn fetch_raw_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, StoreError> {
        Ok(self
            .raw
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .cloned()
            .collect())
    }

    async fn upsert_monitored_location(&self, location: &MonitoredLocation) -> Result<(), StoreError> {
        self.monitored_locations
            .lock()
            .unwrap()
            .insert(location.name.clone(), location.clone());
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn realtime_row(location: &str, timestamp: DateTime<Utc>) -> RealtimeRow {
        RealtimeRow {
            timestamp,
            location: location.into(),
            latitude: 0.0,
            longitude: 0.0,
            aqi_value: Some(45),
            traffic_level: Some(2),
            aqi_category: Some("good".into()),
            is_peak_hour: false,
            processing_timestamp: Utc::now(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn upsert_realtime_reports_freshness_by_key() {
        let store = InMemoryStore::new();
        let row = realtime_row("A", Utc::now());
        assert!(store.upsert_realtime(&row).await.unwrap());
        assert!(!store.upsert_realtime(&row).await.unwrap());
        assert_eq!(store.upsert_realtime_call_count(), 2);
    }

    #[tokio::test]
    async fn upsert_hourly_accumulates_running_average() {
        let store = InMemoryStore::new();
        let date = Utc::now().date_naive();
        store
            .upsert_hourly(date, 9, "A", Some(2.0), Some(40.0), true)
            .await
            .unwrap();
        store
            .upsert_hourly(date, 9, "A", Some(4.0), Some(60.0), true)
            .await
            .unwrap();
        let rows = store.fetch_hourly_for_date(date).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].avg_traffic_level, Some(3.0));
        assert_eq!(rows[0].avg_aqi_value, Some(50.0));
        assert_eq!(rows[0].total_records, 2);
    }
}
