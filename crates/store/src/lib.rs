//! Store Adapter.

pub mod error;
#[cfg(any(test, feature = "test-fake"))]
pub mod fake;
pub mod pg;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use trafficaqi_core::{
    DailyAggregation, HourlyAggregation, MonitoredLocation, PeakHourSummary, RawRecord,
    RealtimeRow,
};

pub use error::StoreError;
pub use pg::PgStore;

/// Narrow, table-grouped persistence operations. Each method's failure
/// semantics distinguish transient connection errors from idempotent-overwrite
/// on unique-key conflicts.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    async fn append_raw(&self, record: &RawRecord) -> Result<(), StoreError>;

    /// Returns `true` iff this call performed a fresh insert (vs. an overwrite
    /// of an existing (location, timestamp) row) — the Speed Layer uses this to
    /// guard against double-incrementing hourly counters on bus redelivery.
    async fn upsert_realtime(&self, row: &RealtimeRow) -> Result<bool, StoreError>;

    async fn evict_stale_realtime(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Incremental per-record update, used by the Speed Layer. Each present
    /// metric contributes one more sample to its own running average — counts
    /// are tracked per metric, not per record.
    async fn upsert_hourly(
        &self,
        date: NaiveDate,
        hour: i32,
        location: &str,
        traffic_sample: Option<f64>,
        aqi_sample: Option<f64>,
        is_peak_hour: bool,
    ) -> Result<(), StoreError>;

    /// Authoritative overwrite used by the Batch Layer's hourly job — replaces
    /// whatever the Speed Layer had incrementally computed.
    async fn write_hourly_authoritative(&self, row: &HourlyAggregation) -> Result<(), StoreError>;

    async fn write_daily(&self, record: &DailyAggregation) -> Result<(), StoreError>;
    async fn write_peak(&self, record: &PeakHourSummary) -> Result<(), StoreError>;

    async fn fetch_recent_realtime(&self, max_age: Duration) -> Result<Vec<RealtimeRow>, StoreError>;
    async fn fetch_hourly(&self, days: i64) -> Result<Vec<HourlyAggregation>, StoreError>;
    async fn fetch_hourly_for_date(&self, date: NaiveDate) -> Result<Vec<HourlyAggregation>, StoreError>;
    async fn fetch_peak_summary(&self, date: NaiveDate) -> Result<Option<PeakHourSummary>, StoreError>;
    async fn fetch_latest_raw_per_location(&self) -> Result<Vec<RawRecord>, StoreError>;
    async fn fetch_raw_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, StoreError>;

    async fn upsert_monitored_location(&self, location: &MonitoredLocation) -> Result<(), StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}
