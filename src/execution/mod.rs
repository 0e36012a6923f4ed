//! Pipeline execution - scheduler, step executor, and engine

pub mod engine;
pub mod executor;
pub mod scheduler;

pub use engine::{ExecutionEngine, ExecutionError, ExecutionEvent};
pub use executor::{ExecutionResult, StepExecutor};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
