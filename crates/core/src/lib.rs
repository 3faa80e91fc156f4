pub mod config;
pub mod domain;
pub mod error;
pub mod health;
pub mod time;

pub use config::PipelineConfig;
pub use domain::*;
pub use error::PipelineError;
