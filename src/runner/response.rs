//! Tool output and error types

use thiserror::Error;

/// Error types for tool invocations
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {message}")]
    Spawn { program: String, message: String },

    #[error("'{program}' exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to decode output of '{program}': {message}")]
    OutputDecode { program: String, message: String },
}

/// Captured output of a completed tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Captured stdout
    pub stdout: String,

    /// Captured stderr (tools like dcm2niix log progress here)
    pub stderr: String,
}

impl ToolOutput {
    /// Create an output with empty stderr
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}
