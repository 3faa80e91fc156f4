//! Typed, environment-sourced configuration.
//!
//! This pipeline has exactly one deployment shape, so every key is read
//! unprefixed. Missing required values are a fatal `ConfigError` at startup —
//! nothing here is silently defaulted when a value is required.

use std::env;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Load `.env` file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_u32(key: &str, default: u32) -> u32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    env_opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_hour_set(key: &str, default: &[u32]) -> Vec<u32> {
    match env_opt(key) {
        Some(raw) => raw
            .split(',')
            .filter_map(|s| s.trim().parse::<u32>().ok())
            .collect(),
        None => default.to_vec(),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub poll_interval_seconds: u64,
    pub upstream_timeout_seconds: u64,
    pub fanout_concurrency: u32,
    pub realtime_retention_seconds: u64,
    pub realtime_eviction_interval_seconds: u64,
    pub batch_hourly_minute: u32,
    pub batch_daily_hour_local: u32,
    pub batch_peak_hour_local: u32,
    pub peak_hours_local: Vec<u32>,
    pub local_offset_hours: i32,
    pub shutdown_grace_seconds: u64,
    pub shutdown_hard_seconds: u64,
    pub bus_topic: String,
    pub consumer_group: String,
    pub postgres: PostgresConfig,
    pub upstream: UpstreamConfig,
    pub locations: Vec<MonitoredLocationConfig>,
}

impl PipelineConfig {
    /// Build config from environment variables (call [`load_dotenv`] first).
    ///
    /// Fails with [`PipelineError::Config`] if required values (store connection,
    /// monitored locations) are missing or malformed — fatal at startup, never a
    /// silently-defaulted feature.
    pub fn from_env() -> Result<Self, PipelineError> {
        let postgres = PostgresConfig::from_env()?;
        let locations = load_locations()?;
        if locations.is_empty() {
            return Err(PipelineError::Config(
                "no monitored locations configured (LOCATIONS_JSON or LOCATIONS_FILE)".into(),
            ));
        }

        Ok(Self {
            poll_interval_seconds: env_u64("POLL_INTERVAL_SECONDS", 15),
            upstream_timeout_seconds: env_u64("UPSTREAM_TIMEOUT_SECONDS", 10),
            fanout_concurrency: env_u32("FANOUT_CONCURRENCY", 32),
            realtime_retention_seconds: env_u64("REALTIME_RETENTION_SECONDS", 3600),
            realtime_eviction_interval_seconds: env_u64("REALTIME_EVICTION_INTERVAL_SECONDS", 60),
            batch_hourly_minute: env_u32("BATCH_HOURLY_MINUTE", 5),
            batch_daily_hour_local: env_u32("BATCH_DAILY_HOUR_LOCAL", 2),
            batch_peak_hour_local: env_u32("BATCH_PEAK_HOUR_LOCAL", 3),
            peak_hours_local: env_hour_set("PEAK_HOURS_LOCAL", &[6, 7, 8, 9, 16, 17, 18, 19]),
            local_offset_hours: env_i32("LOCAL_OFFSET_HOURS", 7),
            shutdown_grace_seconds: env_u64("SHUTDOWN_GRACE_SECONDS", 30),
            shutdown_hard_seconds: env_u64("SHUTDOWN_HARD_SECONDS", 60),
            bus_topic: env_or("PIPELINE_BUS_TOPIC", "traffic-aqi-data"),
            consumer_group: env_or("PIPELINE_CONSUMER_GROUP", "speed-layer"),
            postgres,
            upstream: UpstreamConfig::from_env(),
            locations,
        })
    }

    pub fn log_summary(&self) {
        tracing::info!(
            locations = self.locations.len(),
            poll_interval_seconds = self.poll_interval_seconds,
            bus_topic = %self.bus_topic,
            pg_host = %self.postgres.host,
            "pipeline config loaded"
        );
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env() -> Result<Self, PipelineError> {
        let cfg = Self {
            host: env_or("PG_HOST", "localhost"),
            port: env_opt("PG_PORT").and_then(|v| v.parse().ok()).unwrap_or(5432),
            database: env_or("PG_DATABASE", "trafficaqi"),
            username: env_opt("PG_USERNAME"),
            password: env_opt("PG_PASSWORD"),
            ssl_mode: env_or("PG_SSL_MODE", "prefer"),
            max_connections: env_u32("PG_MAX_CONNECTIONS", 10),
        };
        if cfg.username.is_none() {
            return Err(PipelineError::Config(
                "PG_USERNAME is required — the store adapter has no optional mode".into(),
            ));
        }
        Ok(cfg)
    }

    pub fn connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    /// Connection string with the password masked, safe to log.
    pub fn masked_connection_string(&self) -> String {
        let user = self.username.as_deref().unwrap_or("postgres");
        format!(
            "postgres://{}:***@{}:{}/{}?sslmode={}",
            user, self.host, self.port, self.database, self.ssl_mode
        )
    }
}

// ── Upstream feeds ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub traffic_base_url: String,
    pub aqi_base_url: String,
    pub api_key: Option<String>,
}

impl UpstreamConfig {
    fn from_env() -> Self {
        Self {
            traffic_base_url: env_or("TRAFFIC_FEED_URL", "http://localhost:9001/traffic"),
            aqi_base_url: env_or("AQI_FEED_URL", "http://localhost:9002/aqi"),
            api_key: env_opt("UPSTREAM_API_KEY"),
        }
    }
}

// ── Monitored locations ───────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredLocationConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Load the static configured set of monitored locations.
///
/// Tries `LOCATIONS_JSON` (an inline JSON array, convenient for container envs)
/// first, then `LOCATIONS_FILE` (a path to a JSON file).
fn load_locations() -> Result<Vec<MonitoredLocationConfig>, PipelineError> {
    if let Some(raw) = env_opt("LOCATIONS_JSON") {
        return serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("LOCATIONS_JSON is invalid: {e}")));
    }
    if let Some(path) = env_opt("LOCATIONS_FILE") {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| PipelineError::Config(format!("cannot read LOCATIONS_FILE {path}: {e}")))?;
        return serde_json::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("LOCATIONS_FILE {path} is invalid: {e}")));
    }
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_hour_set_parses_csv() {
        std::env::set_var("TEST_HOURS", "6,7,8,9,16,17,18,19");
        let hours = env_hour_set("TEST_HOURS", &[0]);
        assert_eq!(hours, vec![6, 7, 8, 9, 16, 17, 18, 19]);
        std::env::remove_var("TEST_HOURS");
    }

    #[test]
    fn env_hour_set_falls_back_to_default() {
        std::env::remove_var("TEST_HOURS_UNSET");
        let hours = env_hour_set("TEST_HOURS_UNSET", &[6, 7]);
        assert_eq!(hours, vec![6, 7]);
    }

    #[test]
    fn postgres_connection_string_masks_password_only_in_masked_variant() {
        let cfg = PostgresConfig {
            host: "db".into(),
            port: 5432,
            database: "trafficaqi".into(),
            username: Some("pipeline".into()),
            password: Some("s3cret".into()),
            ssl_mode: "prefer".into(),
            max_connections: 10,
        };
        assert!(cfg.connection_string().contains("s3cret"));
        assert!(!cfg.masked_connection_string().contains("s3cret"));
    }
}
