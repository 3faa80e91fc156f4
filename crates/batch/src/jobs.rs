//! Hourly/daily/peak-hour job bodies.
//!
//! Each job computes its window's aggregation from the raw log, then upserts
//! by natural key — restartable and re-executable over the same window
//! without changing the final state.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use tracing::{info, warn};

use trafficaqi_core::{DailyAggregation, HourlyAggregation, PeakHourSummary, RawRecord};
use trafficaqi_store::{StoreAdapter, StoreError};

#[derive(Default)]
struct MetricAcc {
    sum: f64,
    count: i64,
    min: f64,
    max: f64,
}

impl MetricAcc {
    fn observe(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.sum += value;
        self.count += 1;
    }

    fn avg(&self) -> Option<f64> {
        (self.count > 0).then_some(self.sum / self.count as f64)
    }

    fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }
}

/// The local hour immediately before "now" — the window the hourly job rebuilds.
fn previous_hour_window(now: DateTime<Utc>, offset_hours: i32) -> (NaiveDate, u32, DateTime<Utc>, DateTime<Utc>) {
    let local_now = now + Duration::hours(offset_hours as i64);
    let current_hour_start_local = local_now
        .date_naive()
        .and_hms_opt(local_now.hour(), 0, 0)
        .unwrap();
    let prev_hour_start_local = current_hour_start_local - Duration::hours(1);

    let offset = Duration::hours(offset_hours as i64);
    let start_utc = DateTime::<Utc>::from_naive_utc_and_offset(prev_hour_start_local, Utc) - offset;
    let end_utc = DateTime::<Utc>::from_naive_utc_and_offset(current_hour_start_local, Utc) - offset;
    (prev_hour_start_local.date(), prev_hour_start_local.hour(), start_utc, end_utc)
}

/// The local calendar day immediately before "now" — the window the daily job rebuilds.
fn previous_day_window(now: DateTime<Utc>, offset_hours: i32) -> (NaiveDate, DateTime<Utc>, DateTime<Utc>) {
    let local_now = now + Duration::hours(offset_hours as i64);
    let today_start_local = local_now.date_naive().and_hms_opt(0, 0, 0).unwrap();
    let yesterday_start_local = today_start_local - Duration::days(1);

    let offset = Duration::hours(offset_hours as i64);
    let start_utc = DateTime::<Utc>::from_naive_utc_and_offset(yesterday_start_local, Utc) - offset;
    let end_utc = DateTime::<Utc>::from_naive_utc_and_offset(today_start_local, Utc) - offset;
    (yesterday_start_local.date(), start_utc, end_utc)
}

/// Rebuild the hourly aggregation for the previous completed local hour, for
/// every location that has at least one raw record in the window, and
/// overwrite whatever the Speed Layer had computed incrementally — Open
/// Question (c).
pub async fn run_hourly_job<S: StoreAdapter>(
    store: &S,
    local_offset_hours: i32,
    peak_hours_local: &[u32],
) -> Result<(), StoreError> {
    let (date, hour, start, end) = previous_hour_window(Utc::now(), local_offset_hours);
    let records = store.fetch_raw_range(start, end).await?;
    let is_peak_hour = peak_hours_local.contains(&hour);

    let mut traffic: HashMap<String, MetricAcc> = HashMap::new();
    let mut aqi: HashMap<String, MetricAcc> = HashMap::new();
    let mut total: HashMap<String, i64> = HashMap::new();

    for record in &records {
        *total.entry(record.location.clone()).or_insert(0) += 1;
        if let Some(v) = record.traffic_level {
            traffic.entry(record.location.clone()).or_default().observe(v as f64);
        }
        if let Some(v) = record.aqi_value {
            aqi.entry(record.location.clone()).or_default().observe(v as f64);
        }
    }

    if total.is_empty() {
        info!(%date, hour, "hourly job: no raw records in window — nothing to write");
        return Ok(());
    }

    for (location, total_records) in &total {
        let traffic_acc = traffic.get(location);
        let aqi_acc = aqi.get(location);
        let row = HourlyAggregation {
            date,
            hour: hour as i32,
            location: location.clone(),
            avg_traffic_level: traffic_acc.and_then(MetricAcc::avg),
            avg_aqi_value: aqi_acc.and_then(MetricAcc::avg),
            traffic_sample_count: traffic_acc.map(|a| a.count).unwrap_or(0),
            aqi_sample_count: aqi_acc.map(|a| a.count).unwrap_or(0),
            total_records: *total_records,
            is_peak_hour,
            updated_at: Utc::now(),
        };
        store.write_hourly_authoritative(&row).await?;
    }

    info!(%date, hour, locations = total.len(), "hourly job completed");
    Ok(())
}

/// Rebuild the daily aggregation for the previous calendar day, one row per
/// location observed in the raw log.
pub async fn run_daily_job<S: StoreAdapter>(store: &S, local_offset_hours: i32) -> Result<(), StoreError> {
    let (date, start, end) = previous_day_window(Utc::now(), local_offset_hours);
    let records = store.fetch_raw_range(start, end).await?;

    let mut traffic: HashMap<String, MetricAcc> = HashMap::new();
    let mut aqi: HashMap<String, MetricAcc> = HashMap::new();
    let mut total: HashMap<String, i64> = HashMap::new();
    let mut any_peak: HashMap<String, bool> = HashMap::new();

    for record in &records {
        *total.entry(record.location.clone()).or_insert(0) += 1;
        any_peak
            .entry(record.location.clone())
            .and_modify(|p| *p = *p || record.is_peak_hour)
            .or_insert(record.is_peak_hour);
        if let Some(v) = record.traffic_level {
            traffic.entry(record.location.clone()).or_default().observe(v as f64);
        }
        if let Some(v) = record.aqi_value {
            aqi.entry(record.location.clone()).or_default().observe(v as f64);
        }
    }

    if total.is_empty() {
        info!(%date, "daily job: no raw records in window — nothing to write");
        return Ok(());
    }

    for (location, data_points_count) in &total {
        let traffic_acc = traffic.get(location);
        let aqi_acc = aqi.get(location);
        let row = DailyAggregation {
            date,
            location: location.clone(),
            hour: None,
            avg_traffic_level: traffic_acc.and_then(MetricAcc::avg),
            min_traffic_level: traffic_acc.and_then(MetricAcc::min),
            max_traffic_level: traffic_acc.and_then(MetricAcc::max),
            avg_aqi_value: aqi_acc.and_then(MetricAcc::avg),
            min_aqi_value: aqi_acc.and_then(MetricAcc::min),
            max_aqi_value: aqi_acc.and_then(MetricAcc::max),
            data_points_count: *data_points_count,
            is_peak_hour: any_peak.get(location).copied().unwrap_or(false),
        };
        store.write_daily(&row).await?;
    }

    info!(%date, locations = total.len(), "daily job completed");
    Ok(())
}

/// Select the previous day's worst hour for each metric from the hourly
/// aggregations table and write the single peak-hour summary row for that date.
pub async fn run_peak_hour_job<S: StoreAdapter>(store: &S, local_offset_hours: i32) -> Result<(), StoreError> {
    let (date, _, _) = previous_day_window(Utc::now(), local_offset_hours);
    let rows = store.fetch_hourly_for_date(date).await?;

    let worst_aqi = rows
        .iter()
        .filter_map(|r| r.avg_aqi_value.map(|v| (r, v)))
        .max_by(|(_, a), (_, b)| a.total_cmp(b));
    let worst_traffic = rows
        .iter()
        .filter_map(|r| r.avg_traffic_level.map(|v| (r, v)))
        .max_by(|(_, a), (_, b)| a.total_cmp(b));

    let (Some((aqi_row, aqi_value)), Some((traffic_row, traffic_value))) = (worst_aqi, worst_traffic) else {
        warn!(%date, "peak-hour job: insufficient hourly data — skipping");
        return Ok(());
    };

    let summary = PeakHourSummary {
        analysis_date: date,
        peak_aqi_hour: aqi_row.hour,
        peak_aqi_location: aqi_row.location.clone(),
        peak_aqi_value: aqi_value,
        peak_traffic_hour: traffic_row.hour,
        peak_traffic_location: traffic_row.location.clone(),
        peak_traffic_value: traffic_value,
    };
    store.write_peak(&summary).await?;

    info!(%date, "peak-hour job completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use trafficaqi_core::{MonitoredLocation, RealtimeRow};

    #[derive(Default)]
    struct FakeStore {
        raw: Vec<RawRecord>,
        hourly: Vec<HourlyAggregation>,
        written_hourly: Mutex<Vec<HourlyAggregation>>,
        written_daily: Mutex<Vec<DailyAggregation>>,
        written_peak: Mutex<Vec<PeakHourSummary>>,
    }

    #[async_trait]
    impl StoreAdapter for FakeStore {
        async fn append_raw(&self, _record: &RawRecord) -> Result<(), StoreError> {
            Ok(())
        }
        async fn upsert_realtime(&self, _row: &RealtimeRow) -> Result<bool, StoreError> {
            Ok(true)
        }
        async fn evict_stale_realtime(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn upsert_hourly(
            &self,
            _date: NaiveDate,
            _hour: i32,
            _location: &str,
            _traffic_sample: Option<f64>,
            _aqi_sample: Option<f64>,
            _is_peak_hour: bool,
        ) -> Result<(), StoreError> {
            Ok(())
        }
        async fn write_hourly_authoritative(&self, row: &HourlyAggregation) -> Result<(), StoreError> {
            self.written_hourly.lock().unwrap().push(row.clone());
            Ok(())
        }
        async fn write_daily(&self, row: &DailyAggregation) -> Result<(), StoreError> {
            self.written_daily.lock().unwrap().push(row.clone());
            Ok(())
        }
        async fn write_peak(&self, row: &PeakHourSummary) -> Result<(), StoreError> {
            self.written_peak.lock().unwrap().push(row.clone());
            Ok(())
        }
        async fn fetch_recent_realtime(&self, _max_age: std::time::Duration) -> Result<Vec<RealtimeRow>, StoreError> {
            Ok(vec![])
        }
        async fn fetch_hourly(&self, _days: i64) -> Result<Vec<HourlyAggregation>, StoreError> {
            Ok(self.hourly.clone())
        }
        async fn fetch_hourly_for_date(&self, date: NaiveDate) -> Result<Vec<HourlyAggregation>, StoreError> {
            Ok(self.hourly.iter().filter(|r| r.date == date).cloned().collect())
        }
        async fn fetch_peak_summary(&self, _date: NaiveDate) -> Result<Option<PeakHourSummary>, StoreError> {
            Ok(None)
        }
        async fn fetch_latest_raw_per_location(&self) -> Result<Vec<RawRecord>, StoreError> {
            Ok(vec![])
        }
        async fn fetch_raw_range(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<RawRecord>, StoreError> {
            Ok(self.raw.clone())
        }
        async fn upsert_monitored_location(&self, _location: &MonitoredLocation) -> Result<(), StoreError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    fn raw(location: &str, traffic: Option<i32>, aqi: Option<i32>, peak: bool) -> RawRecord {
        RawRecord {
            timestamp: Utc::now(),
            location: location.into(),
            latitude: 0.0,
            longitude: 0.0,
            aqi_value: aqi,
            traffic_level: traffic,
            aqi_category: aqi.map(|v| trafficaqi_core::category_label(trafficaqi_core::AqiCategory::from_aqi(v))),
            is_peak_hour: peak,
            ingested_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn hourly_job_recomputes_averages_and_counts_per_location() {
        let store = FakeStore {
            raw: vec![
                raw("A", Some(2), Some(40), false),
                raw("A", Some(4), Some(60), false),
                raw("B", None, Some(120), false),
            ],
            ..Default::default()
        };
        run_hourly_job(&store, 7, &[6, 7, 8, 9, 16, 17, 18, 19]).await.unwrap();
        let written = store.written_hourly.lock().unwrap();
        assert_eq!(written.len(), 2);
        let a = written.iter().find(|r| r.location == "A").unwrap();
        assert_eq!(a.avg_traffic_level, Some(3.0));
        assert_eq!(a.traffic_sample_count, 2);
        assert_eq!(a.total_records, 2);
        let b = written.iter().find(|r| r.location == "B").unwrap();
        assert_eq!(b.traffic_sample_count, 0);
        assert_eq!(b.avg_traffic_level, None);
    }

    #[tokio::test]
    async fn hourly_job_is_a_noop_on_an_empty_window() {
        let store = FakeStore::default();
        run_hourly_job(&store, 7, &[6, 7, 8, 9]).await.unwrap();
        assert!(store.written_hourly.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn daily_job_tracks_min_max_avg_and_any_peak_hour() {
        let store = FakeStore {
            raw: vec![raw("A", Some(2), Some(40), false), raw("A", Some(5), Some(80), true)],
            ..Default::default()
        };
        run_daily_job(&store, 7).await.unwrap();
        let written = store.written_daily.lock().unwrap();
        let a = &written[0];
        assert_eq!(a.min_traffic_level, Some(2.0));
        assert_eq!(a.max_traffic_level, Some(5.0));
        assert_eq!(a.avg_traffic_level, Some(3.5));
        assert!(a.is_peak_hour);
        assert_eq!(a.data_points_count, 2);
    }

    #[tokio::test]
    async fn peak_hour_job_picks_the_max_average_per_metric() {
        let date = (Utc::now() - Duration::days(1)).date_naive();
        let store = FakeStore {
            hourly: vec![
                HourlyAggregation {
                    date,
                    hour: 17,
                    location: "Sudirman".into(),
                    avg_traffic_level: Some(2.0),
                    avg_aqi_value: Some(180.3),
                    traffic_sample_count: 5,
                    aqi_sample_count: 5,
                    total_records: 5,
                    is_peak_hour: true,
                    updated_at: Utc::now(),
                },
                HourlyAggregation {
                    date,
                    hour: 8,
                    location: "Thamrin".into(),
                    avg_traffic_level: Some(4.6),
                    avg_aqi_value: Some(90.0),
                    traffic_sample_count: 5,
                    aqi_sample_count: 5,
                    total_records: 5,
                    is_peak_hour: true,
                    updated_at: Utc::now(),
                },
            ],
            ..Default::default()
        };
        run_peak_hour_job(&store, 7).await.unwrap();
        let written = store.written_peak.lock().unwrap();
        let summary = &written[0];
        assert_eq!(summary.peak_aqi_location, "Sudirman");
        assert_eq!(summary.peak_aqi_hour, 17);
        assert_eq!(summary.peak_traffic_location, "Thamrin");
        assert_eq!(summary.peak_traffic_hour, 8);
    }
}
