//! Serving Layer. Read-only façade over the Store Adapter.

pub mod http;

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use std::time::Duration;

use trafficaqi_core::{HourlyAggregation, PeakHourSummary, RealtimeRow};
use trafficaqi_store::{StoreAdapter, StoreError};

/// Which tier of the fallback chain produced a [`UnifiedView`] — the
/// dashboard's "data source" indicator. The tier order is part of the
/// contract, not an implementation detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Speed,
    Batch,
    Raw,
    Empty,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnifiedRow {
    pub location: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub aqi_value: Option<i32>,
    pub traffic_level: Option<i32>,
    pub aqi_category: Option<String>,
    pub is_peak_hour: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnifiedView {
    pub source: DataSource,
    pub rows: Vec<UnifiedRow>,
}

pub struct ServingLayer<S> {
    store: Arc<S>,
}

impl<S: StoreAdapter> ServingLayer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Three-tier fallback: speed → batch → raw, each labelled for the
    /// dashboard's data-source indicator. Never hides a store failure behind
    /// an empty result — `StoreError` always propagates.
    pub async fn get_unified_view(&self, max_realtime_age: Duration) -> Result<UnifiedView, StoreError> {
        let realtime = self.store.fetch_recent_realtime(max_realtime_age).await?;
        if !realtime.is_empty() {
            return Ok(UnifiedView {
                source: DataSource::Speed,
                rows: realtime.into_iter().map(realtime_row_to_unified).collect(),
            });
        }

        let hourly = self.store.fetch_hourly(1).await?;
        if !hourly.is_empty() {
            return Ok(UnifiedView {
                source: DataSource::Batch,
                rows: hourly.into_iter().map(hourly_row_to_unified).collect(),
            });
        }

        let raw = self.store.fetch_latest_raw_per_location().await?;
        if !raw.is_empty() {
            return Ok(UnifiedView {
                source: DataSource::Raw,
                rows: raw
                    .into_iter()
                    .map(|r| UnifiedRow {
                        location: r.location,
                        timestamp: r.timestamp,
                        aqi_value: r.aqi_value,
                        traffic_level: r.traffic_level,
                        aqi_category: r.aqi_category,
                        is_peak_hour: r.is_peak_hour,
                    })
                    .collect(),
            });
        }

        Ok(UnifiedView {
            source: DataSource::Empty,
            rows: Vec::new(),
        })
    }

    /// Hourly aggregations for the last `days` days, sorted by (location, date, hour).
    pub async fn get_hourly_series(&self, days: i64) -> Result<Vec<HourlyAggregation>, StoreError> {
        let mut rows = self.store.fetch_hourly(days).await?;
        rows.sort_by(|a, b| (&a.location, a.date, a.hour).cmp(&(&b.location, b.date, b.hour)));
        Ok(rows)
    }

    pub async fn get_peak_summary(&self, date: NaiveDate) -> Result<Option<PeakHourSummary>, StoreError> {
        self.store.fetch_peak_summary(date).await
    }

    pub async fn health_check(&self) -> Result<(), StoreError> {
        self.store.health_check().await
    }
}

fn realtime_row_to_unified(r: RealtimeRow) -> UnifiedRow {
    UnifiedRow {
        location: r.location,
        timestamp: r.timestamp,
        aqi_value: r.aqi_value,
        traffic_level: r.traffic_level,
        aqi_category: r.aqi_category,
        is_peak_hour: r.is_peak_hour,
    }
}

fn hourly_row_to_unified(r: HourlyAggregation) -> UnifiedRow {
    UnifiedRow {
        location: r.location,
        timestamp: r.date.and_hms_opt(r.hour as u32, 0, 0).unwrap_or_default().and_utc(),
        aqi_value: r.avg_aqi_value.map(|v| v.round() as i32),
        traffic_level: r.avg_traffic_level.map(|v| v.round() as i32),
        aqi_category: r.avg_aqi_value.map(|v| {
            trafficaqi_core::category_label(trafficaqi_core::AqiCategory::from_aqi(v.round() as i32))
        }),
        is_peak_hour: r.is_peak_hour,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use trafficaqi_store::fake::InMemoryStore;

    fn realtime_row() -> RealtimeRow {
        RealtimeRow {
            timestamp: Utc::now(),
            location: "A".into(),
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
    async fn falls_back_to_batch_when_realtime_is_empty() {
        let store = InMemoryStore::new();
        store.seed_hourly(vec![HourlyAggregation {
            date: Utc::now().date_naive(),
            hour: 9,
            location: "A".into(),
            avg_traffic_level: Some(2.0),
            avg_aqi_value: Some(45.0),
            traffic_sample_count: 3,
            aqi_sample_count: 3,
            total_records: 3,
            is_peak_hour: true,
            updated_at: Utc::now(),
        }]);
        let serving = ServingLayer::new(Arc::new(store));
        let view = serving.get_unified_view(Duration::from_secs(60)).await.unwrap();
        assert_eq!(view.source, DataSource::Batch);
        assert_eq!(view.rows.len(), 1);
    }

    #[tokio::test]
    async fn prefers_realtime_over_batch_and_raw() {
        let store = InMemoryStore::new();
        store.seed_realtime(vec![realtime_row()]);
        let serving = ServingLayer::new(Arc::new(store));
        let view = serving.get_unified_view(Duration::from_secs(60)).await.unwrap();
        assert_eq!(view.source, DataSource::Speed);
    }

    #[tokio::test]
    async fn returns_empty_tier_when_all_three_are_empty() {
        let serving = ServingLayer::new(Arc::new(InMemoryStore::new()));
        let view = serving.get_unified_view(Duration::from_secs(60)).await.unwrap();
        assert_eq!(view.source, DataSource::Empty);
        assert!(view.rows.is_empty());
    }
}
