//! studyrun - a study-configured runner for DICOM-to-NIfTI conversion pipelines

pub mod cli;
pub mod core;
pub mod datasets;
pub mod execution;
pub mod loader;
pub mod runner;
pub mod study;

// Re-export commonly used types
pub use crate::core::{ExecutionStatus, Pipeline, PipelineConfig, RunContext, Step, StepState};
pub use datasets::{get_sample_data, DatasetError, SampleDataset};
pub use execution::{ExecutionEngine, ExecutionError, ExecutionEvent, SchedulingStrategy};
pub use loader::{LoadError, PipelineLoader};
pub use runner::{CommandRunner, RunnerError, StepRunner, ToolInvocation, ToolOutput};
pub use study::{RunOptions, RunReport, StudyConfig, StudyError, StudyModule};
