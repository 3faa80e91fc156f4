use thiserror::Error;

/// The six error kinds the pipeline recognizes.
///
/// Adapter-local error enums (`BusError`, `StoreError`, `UpstreamError`) convert into
/// this one at component boundaries so every loop body can propagate with `?`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("upstream feed error: {0}")]
    TransientUpstream(String),

    #[error("bus error: {0}")]
    TransientBus(String),

    #[error("store unavailable: {0}")]
    TransientStore(String),

    #[error("data contract violation: {0}")]
    DataContract(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invariant violation: {0}")]
    Logic(String),
}

impl PipelineError {
    /// Whether the caller should retry this operation (vs. drop/fatal).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PipelineError::TransientUpstream(_)
                | PipelineError::TransientBus(_)
                | PipelineError::TransientStore(_)
        )
    }

    /// Whether the process should exit so a supervisor restarts it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Config(_) | PipelineError::Logic(_))
    }
}
