//! Core domain entities shared by every layer of the pipeline.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// AQI band, derived deterministically from `aqi_value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AqiCategory {
    Good,
    Moderate,
    UnhealthySensitive,
    Unhealthy,
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    /// Band boundaries: 0-50, 51-100, 101-150, 151-200, 201-300, 301+.
    pub fn from_aqi(value: i32) -> Self {
        match value {
            0..=50 => AqiCategory::Good,
            51..=100 => AqiCategory::Moderate,
            101..=150 => AqiCategory::UnhealthySensitive,
            151..=200 => AqiCategory::Unhealthy,
            201..=300 => AqiCategory::VeryUnhealthy,
            _ => AqiCategory::Hazardous,
        }
    }
}

/// One monitored geographic point, loaded once from static configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredLocation {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// A single ingested observation for one location at one instant.
///
/// Transient on the bus and in the raw log; never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub aqi_value: Option<i32>,
    pub traffic_level: Option<i32>,
    pub aqi_category: Option<AqiCategory>,
    pub is_peak_hour: bool,
}

impl LocationSample {
    /// Build a sample, deriving `aqi_category`/`is_peak_hour`.
    ///
    /// Returns `None` if neither metric is present — the sample is dropped at
    /// ingestion rather than stored with both fields empty.
    pub fn build(
        timestamp: DateTime<Utc>,
        location: impl Into<String>,
        latitude: f64,
        longitude: f64,
        aqi_value: Option<i32>,
        traffic_level: Option<i32>,
        local_offset_hours: i32,
        peak_hours_local: &[u32],
    ) -> Option<Self> {
        if aqi_value.is_none() && traffic_level.is_none() {
            return None;
        }
        let aqi_category = aqi_value.map(AqiCategory::from_aqi);
        let is_peak_hour =
            crate::time::is_peak_hour(timestamp, local_offset_hours, peak_hours_local);
        Some(Self {
            timestamp,
            location: location.into(),
            latitude,
            longitude,
            aqi_value,
            traffic_level,
            aqi_category,
            is_peak_hour,
        })
    }
}

/// A row in the real-time active set. Superset of [`LocationSample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RealtimeRow {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub aqi_value: Option<i32>,
    pub traffic_level: Option<i32>,
    pub aqi_category: Option<String>,
    pub is_peak_hour: bool,
    pub processing_timestamp: DateTime<Utc>,
    pub is_active: bool,
}

impl RealtimeRow {
    pub fn from_sample(sample: &LocationSample, processing_timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp: sample.timestamp,
            location: sample.location.clone(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            aqi_value: sample.aqi_value,
            traffic_level: sample.traffic_level,
            aqi_category: sample.aqi_category.map(category_label),
            is_peak_hour: sample.is_peak_hour,
            processing_timestamp,
            is_active: true,
        }
    }
}

/// One row per (date, hour, location). Updated incrementally by the Speed Layer,
/// overwritten authoritatively by the Batch Layer's hourly job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct HourlyAggregation {
    pub date: NaiveDate,
    pub hour: i32,
    pub location: String,
    pub avg_traffic_level: Option<f64>,
    pub avg_aqi_value: Option<f64>,
    pub traffic_sample_count: i64,
    pub aqi_sample_count: i64,
    pub total_records: i64,
    pub is_peak_hour: bool,
    pub updated_at: DateTime<Utc>,
}

/// One row per (date, location[, hour]). Written only by the Batch Layer's daily job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyAggregation {
    pub date: NaiveDate,
    pub location: String,
    pub hour: Option<i32>,
    pub avg_traffic_level: Option<f64>,
    pub min_traffic_level: Option<f64>,
    pub max_traffic_level: Option<f64>,
    pub avg_aqi_value: Option<f64>,
    pub min_aqi_value: Option<f64>,
    pub max_aqi_value: Option<f64>,
    pub data_points_count: i64,
    pub is_peak_hour: bool,
}

/// One row per analysis date, naming the hour/location with the worst average of
/// each metric the previous day. Written only by the Batch Layer's peak-hour job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PeakHourSummary {
    pub analysis_date: NaiveDate,
    pub peak_aqi_hour: i32,
    pub peak_aqi_location: String,
    pub peak_aqi_value: f64,
    pub peak_traffic_hour: i32,
    pub peak_traffic_location: String,
    pub peak_traffic_value: f64,
}

/// Append-only raw log entry — every sample the Ingestion Poller ever emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawRecord {
    pub timestamp: DateTime<Utc>,
    pub location: String,
    pub latitude: f64,
    pub longitude: f64,
    pub aqi_value: Option<i32>,
    pub traffic_level: Option<i32>,
    pub aqi_category: Option<String>,
    pub is_peak_hour: bool,
    pub ingested_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn from_sample(sample: &LocationSample, ingested_at: DateTime<Utc>) -> Self {
        Self {
            timestamp: sample.timestamp,
            location: sample.location.clone(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            aqi_value: sample.aqi_value,
            traffic_level: sample.traffic_level,
            aqi_category: sample.aqi_category.map(category_label),
            is_peak_hour: sample.is_peak_hour,
            ingested_at,
        }
    }
}

pub fn category_label(c: AqiCategory) -> String {
    serde_json::to_value(c)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aqi_category_boundaries_are_correct() {
        assert_eq!(AqiCategory::from_aqi(0), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(50), AqiCategory::Good);
        assert_eq!(AqiCategory::from_aqi(51), AqiCategory::Moderate);
        assert_eq!(AqiCategory::from_aqi(100), AqiCategory::Moderate);
        assert_eq!(AqiCategory::from_aqi(101), AqiCategory::UnhealthySensitive);
        assert_eq!(AqiCategory::from_aqi(150), AqiCategory::UnhealthySensitive);
        assert_eq!(AqiCategory::from_aqi(151), AqiCategory::Unhealthy);
        assert_eq!(AqiCategory::from_aqi(200), AqiCategory::Unhealthy);
        assert_eq!(AqiCategory::from_aqi(201), AqiCategory::VeryUnhealthy);
        assert_eq!(AqiCategory::from_aqi(300), AqiCategory::VeryUnhealthy);
        assert_eq!(AqiCategory::from_aqi(301), AqiCategory::Hazardous);
        assert_eq!(AqiCategory::from_aqi(500), AqiCategory::Hazardous);
    }

    #[test]
    fn build_drops_sample_with_neither_metric() {
        let sample = LocationSample::build(
            Utc::now(),
            "A",
            0.0,
            0.0,
            None,
            None,
            7,
            &[6, 7, 8, 9, 16, 17, 18, 19],
        );
        assert!(sample.is_none());
    }

    #[test]
    fn build_keeps_sample_with_one_metric() {
        let sample = LocationSample::build(
            Utc::now(),
            "A",
            0.0,
            0.0,
            None,
            Some(3),
            7,
            &[6, 7, 8, 9, 16, 17, 18, 19],
        )
        .unwrap();
        assert_eq!(sample.traffic_level, Some(3));
        assert!(sample.aqi_value.is_none());
        assert!(sample.aqi_category.is_none());
    }
}
