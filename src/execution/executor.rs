//! Step executor - renders and runs a single step through the tool runner

use crate::{
    core::{config::unresolved_placeholders, RunContext, Step},
    runner::StepRunner,
};
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info};

/// Result of executing a step once
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Step completed successfully
    Success { stdout: String },
    /// Step failed
    Failed { error: String },
}

/// Executes a single step
pub struct StepExecutor<R> {
    runner: R,

    /// Environment variables attached to every invocation (study modules)
    env: Vec<(String, String)>,
}

impl<R: StepRunner> StepExecutor<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            env: Vec::new(),
        }
    }

    /// Attach environment variables to every spawned invocation
    pub fn with_env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Execute a step and return the result
    pub async fn execute(&self, step: &Step, context: &RunContext) -> ExecutionResult {
        info!("Executing step: {}", step.id);

        let variables = context.rendering_variables();
        let invocation = step.render_invocation(&variables, &self.env);

        // A skipped dependency records no stdout, so its marker would
        // otherwise reach the tool verbatim
        let unresolved: Vec<String> = std::iter::once(&invocation.program)
            .chain(invocation.args.iter())
            .flat_map(|text| unresolved_placeholders(text))
            .collect();
        if !unresolved.is_empty() {
            error!(
                "Step {} has unresolved placeholders: {:?}",
                step.id, unresolved
            );
            return ExecutionResult::Failed {
                error: format!(
                    "unresolved placeholders {:?}; a referenced step may have been skipped without producing output",
                    unresolved
                ),
            };
        }

        debug!(
            "Invocation for step {}: {} {:?}",
            step.id, invocation.program, invocation.args
        );

        let timeout_duration = Duration::from_secs(step.timeout_secs);
        match timeout(timeout_duration, self.runner.run(&invocation)).await {
            Ok(Ok(output)) => {
                if !output.stderr.trim().is_empty() {
                    debug!("Step {} stderr: {}", step.id, output.stderr.trim());
                }
                info!("Step {} completed successfully", step.id);
                ExecutionResult::Success {
                    stdout: output.stdout,
                }
            }
            Ok(Err(e)) => {
                error!("Runner error for step {}: {}", step.id, e);
                ExecutionResult::Failed {
                    error: e.to_string(),
                }
            }
            Err(_) => {
                error!("Timeout for step {} after {}s", step.id, step.timeout_secs);
                ExecutionResult::Failed {
                    error: format!("Timeout after {} seconds", step.timeout_secs),
                }
            }
        }
    }
}
