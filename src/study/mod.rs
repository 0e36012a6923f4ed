//! Study configuration - the execution option bundle and run entry point

pub mod cache;
pub mod config;
pub mod report;

pub use config::{RunOptions, StudyConfig, StudyError, StudyModule};
pub use report::{RunReport, StepReport};
