use thiserror::Error;

/// Bus-level errors — maps onto `PipelineError::TransientBus` at the component
/// boundary, keeping a transient/permanent split.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("broker unreachable: {0}")]
    TransientPublishFailure(String),

    #[error("payload rejected: {0}")]
    PermanentPublishFailure(String),

    #[error("consume error: {0}")]
    Consume(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<BusError> for trafficaqi_core::PipelineError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::PermanentPublishFailure(msg) => {
                trafficaqi_core::PipelineError::DataContract(msg)
            }
            other => trafficaqi_core::PipelineError::TransientBus(other.to_string()),
        }
    }
}
