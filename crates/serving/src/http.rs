//! Read-only `axum` HTTP surface over [`ServingLayer`].
//!
//! State-carrying `Router` with `/health`-style liveness routes, using the
//! standard `State(..)` + `Json<..>` handler shape.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use trafficaqi_store::{StoreAdapter, StoreError};

use crate::ServingLayer;

pub fn build_router<S: StoreAdapter + 'static>(serving: Arc<ServingLayer<S>>) -> Router {
    Router::new()
        .route("/unified", get(unified::<S>))
        .route("/hourly", get(hourly::<S>))
        .route("/peak", get(peak::<S>))
        .route("/healthz", get(healthz::<S>))
        .route("/readyz", get(readyz::<S>))
        .layer(CorsLayer::permissive())
        .with_state(serving)
}

/// Bind and serve `router` until `shutdown` fires.
pub async fn serve(router: Router, addr: std::net::SocketAddr, mut shutdown: tokio::sync::watch::Receiver<bool>) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "serving layer http surface listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
}

struct ApiError(StoreError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(error = %self.0, "serving layer request failed");
        (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string()).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError(e)
    }
}

#[derive(Deserialize)]
struct UnifiedQuery {
    max_age_seconds: Option<u64>,
}

async fn unified<S: StoreAdapter>(
    State(serving): State<Arc<ServingLayer<S>>>,
    Query(query): Query<UnifiedQuery>,
) -> Result<Json<crate::UnifiedView>, ApiError> {
    let max_age = Duration::from_secs(query.max_age_seconds.unwrap_or(300));
    Ok(Json(serving.get_unified_view(max_age).await?))
}

#[derive(Deserialize)]
struct HourlyQuery {
    days: Option<i64>,
}

async fn hourly<S: StoreAdapter>(
    State(serving): State<Arc<ServingLayer<S>>>,
    Query(query): Query<HourlyQuery>,
) -> Result<Json<Vec<trafficaqi_core::HourlyAggregation>>, ApiError> {
    Ok(Json(serving.get_hourly_series(query.days.unwrap_or(7)).await?))
}

#[derive(Deserialize)]
struct PeakQuery {
    date: NaiveDate,
}

async fn peak<S: StoreAdapter>(
    State(serving): State<Arc<ServingLayer<S>>>,
    Query(query): Query<PeakQuery>,
) -> Result<Json<Option<trafficaqi_core::PeakHourSummary>>, ApiError> {
    Ok(Json(serving.get_peak_summary(query.date).await?))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn healthz<S: StoreAdapter>(State(_serving): State<Arc<ServingLayer<S>>>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn readyz<S: StoreAdapter>(State(serving): State<Arc<ServingLayer<S>>>) -> Result<Json<HealthResponse>, ApiError> {
    serving.health_check().await?;
    Ok(Json(HealthResponse { status: "ready" }))
}
