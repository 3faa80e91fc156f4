use thiserror::Error;

/// Store-level errors — maps onto `PipelineError::TransientStore` for
/// connection failures; constraint violations on idempotent-upsert keys are
/// not represented here because callers treat them as success.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query error: {0}")]
    Query(#[from] sqlx::Error),
}

impl From<StoreError> for trafficaqi_core::PipelineError {
    fn from(e: StoreError) -> Self {
        trafficaqi_core::PipelineError::TransientStore(e.to_string())
    }
}
