//! Core pipeline domain models

pub mod config;
pub mod context;
pub mod pipeline;
pub mod state;
pub mod step;

pub use config::{ParameterConfig, PipelineConfig, StepConfig};
pub use context::RunContext;
pub use pipeline::{Pipeline, UnknownParameterError};
pub use state::{ExecutionStatus, PipelineState, StepState};
pub use step::{Step, StepDefaults};
