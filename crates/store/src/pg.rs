//! PostgreSQL-backed [`StoreAdapter`].
//!
//! Pool construction with masked-URL logging and `sqlx::migrate!`; a stateless
//! unit struct built on `sqlx::query_as` + `ON CONFLICT` upserts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use trafficaqi_core::{
    DailyAggregation, HourlyAggregation, MonitoredLocation, PeakHourSummary, RawRecord,
    RealtimeRow,
};

use crate::error::StoreError;
use crate::StoreAdapter;

/// Construct a connection pool and run migrations. Fails fast: the store is
/// mandatory for this pipeline (it exclusively owns writes), so connection
/// failure is a startup error, not a silently-disabled feature.
pub async fn connect(
    url: &str,
    masked_url: &str,
    max_connections: u32,
) -> Result<PgPool, StoreError> {
    info!(url = %masked_url, "connecting to PostgreSQL");
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("migration failed: {e}")))?;
    info!("database migrations applied");
    Ok(pool)
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StoreAdapter for PgStore {
    async fn append_raw(&self, record: &RawRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO raw_records
                (\"timestamp\", location, latitude, longitude, aqi_value, traffic_level, aqi_category, is_peak_hour, ingested_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(record.timestamp)
        .bind(&record.location)
        .bind(record.latitude)
        .bind(record.longitude)
        .bind(record.aqi_value)
        .bind(record.traffic_level)
        .bind(&record.aqi_category)
        .bind(record.is_peak_hour)
        .bind(record.ingested_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_realtime(&self, row: &RealtimeRow) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO realtime_rows
                (location, \"timestamp\", latitude, longitude, aqi_value, traffic_level, aqi_category, is_peak_hour, processing_timestamp, is_active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, TRUE)
             ON CONFLICT (location, \"timestamp\") DO UPDATE SET
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                aqi_value = EXCLUDED.aqi_value,
                traffic_level = EXCLUDED.traffic_level,
                aqi_category = EXCLUDED.aqi_category,
                is_peak_hour = EXCLUDED.is_peak_hour,
                processing_timestamp = EXCLUDED.processing_timestamp,
                is_active = TRUE
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(&row.location)
        .bind(row.timestamp)
        .bind(row.latitude)
        .bind(row.longitude)
        .bind(row.aqi_value)
        .bind(row.traffic_level)
        .bind(&row.aqi_category)
        .bind(row.is_peak_hour)
        .bind(row.processing_timestamp)
        .fetch_one(&self.pool)
        .await?;
        let inserted: bool = result.try_get("inserted").unwrap_or(true);
        Ok(inserted)
    }

    async fn evict_stale_realtime(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE realtime_rows SET is_active = FALSE
             WHERE is_active AND processing_timestamp < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
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
        let traffic_count_init = if traffic_sample.is_some() { 1 } else { 0 };
        let aqi_count_init = if aqi_sample.is_some() { 1 } else { 0 };

        sqlx::query(
            "INSERT INTO hourly_aggregations
                (date, hour, location, avg_traffic_level, avg_aqi_value,
                 traffic_sample_count, aqi_sample_count, total_records, is_peak_hour, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, 1, $8, now())
             ON CONFLICT (date, hour, location) DO UPDATE SET
                avg_traffic_level = CASE WHEN $4 IS NULL THEN hourly_aggregations.avg_traffic_level
                    ELSE (COALESCE(hourly_aggregations.avg_traffic_level, 0) * hourly_aggregations.traffic_sample_count + $4)
                         / (hourly_aggregations.traffic_sample_count + 1)
                END,
                traffic_sample_count = hourly_aggregations.traffic_sample_count + CASE WHEN $4 IS NULL THEN 0 ELSE 1 END,
                avg_aqi_value = CASE WHEN $5 IS NULL THEN hourly_aggregations.avg_aqi_value
                    ELSE (COALESCE(hourly_aggregations.avg_aqi_value, 0) * hourly_aggregations.aqi_sample_count + $5)
                         / (hourly_aggregations.aqi_sample_count + 1)
                END,
                aqi_sample_count = hourly_aggregations.aqi_sample_count + CASE WHEN $5 IS NULL THEN 0 ELSE 1 END,
                total_records = hourly_aggregations.total_records + 1,
                is_peak_hour = $8,
                updated_at = now()",
        )
        .bind(date)
        .bind(hour)
        .bind(location)
        .bind(traffic_sample)
        .bind(aqi_sample)
        .bind(traffic_count_init)
        .bind(aqi_count_init)
        .bind(is_peak_hour)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_hourly_authoritative(&self, row: &HourlyAggregation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO hourly_aggregations
                (date, hour, location, avg_traffic_level, avg_aqi_value,
                 traffic_sample_count, aqi_sample_count, total_records, is_peak_hour, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
             ON CONFLICT (date, hour, location) DO UPDATE SET
                avg_traffic_level = EXCLUDED.avg_traffic_level,
                avg_aqi_value = EXCLUDED.avg_aqi_value,
                traffic_sample_count = EXCLUDED.traffic_sample_count,
                aqi_sample_count = EXCLUDED.aqi_sample_count,
                total_records = EXCLUDED.total_records,
                is_peak_hour = EXCLUDED.is_peak_hour,
                updated_at = now()",
        )
        .bind(row.date)
        .bind(row.hour)
        .bind(&row.location)
        .bind(row.avg_traffic_level)
        .bind(row.avg_aqi_value)
        .bind(row.traffic_sample_count)
        .bind(row.aqi_sample_count)
        .bind(row.total_records)
        .bind(row.is_peak_hour)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_daily(&self, record: &DailyAggregation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO daily_aggregations
                (date, location, hour, avg_traffic_level, min_traffic_level, max_traffic_level,
                 avg_aqi_value, min_aqi_value, max_aqi_value, data_points_count, is_peak_hour)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (date, location) DO UPDATE SET
                hour = EXCLUDED.hour,
                avg_traffic_level = EXCLUDED.avg_traffic_level,
                min_traffic_level = EXCLUDED.min_traffic_level,
                max_traffic_level = EXCLUDED.max_traffic_level,
                avg_aqi_value = EXCLUDED.avg_aqi_value,
                min_aqi_value = EXCLUDED.min_aqi_value,
                max_aqi_value = EXCLUDED.max_aqi_value,
                data_points_count = EXCLUDED.data_points_count,
                is_peak_hour = EXCLUDED.is_peak_hour",
        )
        .bind(record.date)
        .bind(&record.location)
        .bind(record.hour)
        .bind(record.avg_traffic_level)
        .bind(record.min_traffic_level)
        .bind(record.max_traffic_level)
        .bind(record.avg_aqi_value)
        .bind(record.min_aqi_value)
        .bind(record.max_aqi_value)
        .bind(record.data_points_count)
        .bind(record.is_peak_hour)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_peak(&self, record: &PeakHourSummary) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO peak_hour_summaries
                (analysis_date, peak_aqi_hour, peak_aqi_location, peak_aqi_value,
                 peak_traffic_hour, peak_traffic_location, peak_traffic_value)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (analysis_date) DO UPDATE SET
                peak_aqi_hour = EXCLUDED.peak_aqi_hour,
                peak_aqi_location = EXCLUDED.peak_aqi_location,
                peak_aqi_value = EXCLUDED.peak_aqi_value,
                peak_traffic_hour = EXCLUDED.peak_traffic_hour,
                peak_traffic_location = EXCLUDED.peak_traffic_location,
                peak_traffic_value = EXCLUDED.peak_traffic_value",
        )
        .bind(record.analysis_date)
        .bind(record.peak_aqi_hour)
        .bind(&record.peak_aqi_location)
        .bind(record.peak_aqi_value)
        .bind(record.peak_traffic_hour)
        .bind(&record.peak_traffic_location)
        .bind(record.peak_traffic_value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_recent_realtime(&self, max_age: Duration) -> Result<Vec<RealtimeRow>, StoreError> {
        let cutoff = Utc::now() - chrono::Duration::from_std(max_age).unwrap_or_default();
        let rows = sqlx::query_as::<_, RealtimeRow>(
            "SELECT \"timestamp\", location, latitude, longitude, aqi_value, traffic_level,
                    aqi_category, is_peak_hour, processing_timestamp, is_active
             FROM realtime_rows
             WHERE is_active AND processing_timestamp >= $1
             ORDER BY location, \"timestamp\" DESC",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_hourly(&self, days: i64) -> Result<Vec<HourlyAggregation>, StoreError> {
        let cutoff = (Utc::now() - chrono::Duration::days(days)).date_naive();
        let rows = sqlx::query_as::<_, HourlyAggregation>(
            "SELECT date, hour, location, avg_traffic_level, avg_aqi_value,
                    traffic_sample_count, aqi_sample_count, total_records, is_peak_hour, updated_at
             FROM hourly_aggregations
             WHERE date >= $1
             ORDER BY location, date, hour",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_peak_summary(&self, date: NaiveDate) -> Result<Option<PeakHourSummary>, StoreError> {
        let row = sqlx::query_as::<_, PeakHourSummary>(
            "SELECT analysis_date, peak_aqi_hour, peak_aqi_location, peak_aqi_value,
                    peak_traffic_hour, peak_traffic_location, peak_traffic_value
             FROM peak_hour_summaries WHERE analysis_date = $1",
        )
        .bind(date)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn fetch_latest_raw_per_location(&self) -> Result<Vec<RawRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RawRecord>(
            "SELECT DISTINCT ON (location)
                    \"timestamp\", location, latitude, longitude, aqi_value, traffic_level,
                    aqi_category, is_peak_hour, ingested_at
             FROM raw_records
             ORDER BY location, \"timestamp\" DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_raw_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawRecord>, StoreError> {
        let rows = sqlx::query_as::<_, RawRecord>(
            "SELECT \"timestamp\", location, latitude, longitude, aqi_value, traffic_level,
                    aqi_category, is_peak_hour, ingested_at
             FROM raw_records
             WHERE \"timestamp\" >= $1 AND \"timestamp\" < $2
             ORDER BY location, \"timestamp\"",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn fetch_hourly_for_date(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<HourlyAggregation>, StoreError> {
        let rows = sqlx::query_as::<_, HourlyAggregation>(
            "SELECT date, hour, location, avg_traffic_level, avg_aqi_value,
                    traffic_sample_count, aqi_sample_count, total_records, is_peak_hour, updated_at
             FROM hourly_aggregations WHERE date = $1",
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_monitored_location(&self, location: &MonitoredLocation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO monitored_locations (name, latitude, longitude)
             VALUES ($1, $2, $3)
             ON CONFLICT (name) DO UPDATE SET latitude = EXCLUDED.latitude, longitude = EXCLUDED.longitude",
        )
        .bind(&location.name)
        .bind(location.latitude)
        .bind(location.longitude)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, "store health check failed");
                Err(StoreError::Unavailable(e.to_string()))
            }
        }
    }
}
