//! Capability interfaces for the two upstream feeds: one trait per feed,
//! an HTTP-backed implementation, and a test fake.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Error, Clone)]
pub enum UpstreamError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient upstream error: {0}")]
    Transient(String),

    #[error("permanent upstream error: {0}")]
    Permanent(String),
}

impl UpstreamError {
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Timeout(_) | UpstreamError::Transient(_))
    }
}

/// Fetches the current traffic-level reading for one location.
#[async_trait]
pub trait TrafficClient: Send + Sync {
    async fn fetch_traffic(&self, location: &str, deadline: Instant) -> Result<i32, UpstreamError>;
}

/// Fetches the current AQI reading for one location.
#[async_trait]
pub trait AqiClient: Send + Sync {
    async fn fetch_aqi(&self, location: &str, deadline: Instant) -> Result<i32, UpstreamError>;
}

/// `reqwest`-backed traffic feed client.
///
/// Expects a JSON response of the shape `{"ok": true, "value": <1..5>}` or
/// `{"ok": false, "transient": bool, "reason": "..."}`.
pub struct HttpTrafficClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTrafficClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl TrafficClient for HttpTrafficClient {
    async fn fetch_traffic(&self, location: &str, deadline: Instant) -> Result<i32, UpstreamError> {
        fetch_metric(&self.client, &self.base_url, &self.api_key, location, deadline).await
    }
}

/// `reqwest`-backed AQI feed client. Same wire shape as [`HttpTrafficClient`].
pub struct HttpAqiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpAqiClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }
}

#[async_trait]
impl AqiClient for HttpAqiClient {
    async fn fetch_aqi(&self, location: &str, deadline: Instant) -> Result<i32, UpstreamError> {
        fetch_metric(&self.client, &self.base_url, &self.api_key, location, deadline).await
    }
}

#[derive(serde::Deserialize)]
struct FeedResponse {
    ok: bool,
    value: Option<i32>,
    transient: Option<bool>,
    #[allow(dead_code)]
    reason: Option<String>,
}

async fn fetch_metric(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &Option<String>,
    location: &str,
    deadline: Instant,
) -> Result<i32, UpstreamError> {
    let timeout = deadline.saturating_duration_since(Instant::now());
    if timeout.is_zero() {
        return Err(UpstreamError::Timeout(Duration::ZERO));
    }

    let mut req = client
        .get(base_url)
        .query(&[("location", location)])
        .timeout(timeout);
    if let Some(key) = api_key {
        req = req.bearer_auth(key);
    }

    let response = tokio::time::timeout(timeout, req.send())
        .await
        .map_err(|_| UpstreamError::Timeout(timeout))?
        .map_err(|e| UpstreamError::Transient(e.to_string()))?;

    if response.status().is_server_error() {
        return Err(UpstreamError::Transient(format!(
            "status {}",
            response.status()
        )));
    }
    if !response.status().is_success() {
        return Err(UpstreamError::Permanent(format!(
            "status {}",
            response.status()
        )));
    }

    let parsed: FeedResponse = response
        .json()
        .await
        .map_err(|e| UpstreamError::Permanent(format!("malformed response: {e}")))?;

    if !parsed.ok {
        return if parsed.transient.unwrap_or(true) {
            Err(UpstreamError::Transient(
                parsed.reason.unwrap_or_else(|| "unknown".to_string()),
            ))
        } else {
            Err(UpstreamError::Permanent(
                parsed.reason.unwrap_or_else(|| "unknown".to_string()),
            ))
        };
    }

    parsed
        .value
        .ok_or_else(|| UpstreamError::Permanent("ok response missing value".into()))
}

/// Deterministic in-memory fake for both feeds, for poller tests.
#[cfg(any(test, feature = "test-fake"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeUpstreamClient {
        pub traffic: Mutex<HashMap<String, Result<i32, UpstreamError>>>,
        pub aqi: Mutex<HashMap<String, Result<i32, UpstreamError>>>,
    }

    impl FakeUpstreamClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_traffic(&self, location: &str, result: Result<i32, UpstreamError>) {
            self.traffic.lock().unwrap().insert(location.to_string(), result);
        }

        pub fn set_aqi(&self, location: &str, result: Result<i32, UpstreamError>) {
            self.aqi.lock().unwrap().insert(location.to_string(), result);
        }
    }

    #[async_trait]
    impl TrafficClient for FakeUpstreamClient {
        async fn fetch_traffic(&self, location: &str, _deadline: Instant) -> Result<i32, UpstreamError> {
            self.traffic
                .lock()
                .unwrap()
                .get(location)
                .cloned()
                .unwrap_or_else(|| Err(UpstreamError::Transient("no fixture".into())))
        }
    }

    #[async_trait]
    impl AqiClient for FakeUpstreamClient {
        async fn fetch_aqi(&self, location: &str, _deadline: Instant) -> Result<i32, UpstreamError> {
            self.aqi
                .lock()
                .unwrap()
                .get(location)
                .cloned()
                .unwrap_or_else(|| Err(UpstreamError::Transient("no fixture".into())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeUpstreamClient;
    use super::*;

    #[tokio::test]
    async fn fake_client_returns_configured_fixtures() {
        let fake = FakeUpstreamClient::new();
        fake.set_traffic("A", Ok(3));
        fake.set_aqi("A", Ok(45));

        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(fake.fetch_traffic("A", deadline).await.unwrap(), 3);
        assert_eq!(fake.fetch_aqi("A", deadline).await.unwrap(), 45);
    }

    #[tokio::test]
    async fn fake_client_defaults_to_transient_error_for_unknown_location() {
        let fake = FakeUpstreamClient::new();
        let deadline = Instant::now() + Duration::from_secs(1);
        let err = fake.fetch_traffic("unknown", deadline).await.unwrap_err();
        assert!(err.is_transient());
    }
}
