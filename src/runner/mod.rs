//! Tool runner - executes rendered step invocations

pub mod command;
pub mod response;

use async_trait::async_trait;
pub use command::CommandRunner;
pub use response::{RunnerError, ToolOutput};

/// A fully rendered tool invocation, ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Program to spawn
    pub program: String,

    /// Rendered arguments
    pub args: Vec<String>,

    /// Extra environment variables (from study modules)
    pub env: Vec<(String, String)>,
}

/// Trait for step execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run an invocation and capture its output
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, RunnerError>;
}
