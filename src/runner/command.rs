//! Subprocess runner - spawns conversion tools and captures their output

use crate::runner::{RunnerError, StepRunner, ToolInvocation, ToolOutput};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs step invocations as local subprocesses
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    /// Create a new subprocess runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepRunner for CommandRunner {
    /// Spawn the program and capture stdout/stderr
    ///
    /// # Errors
    /// Returns `RunnerError` if:
    /// - The program cannot be spawned
    /// - The program exits with a non-zero status
    /// - Stdout is not valid UTF-8
    async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, RunnerError> {
        debug!(
            "Spawning '{}' with {} args",
            invocation.program,
            invocation.args.len()
        );

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RunnerError::Spawn {
                program: invocation.program.clone(),
                message: e.to_string(),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(
                "'{}' exited with code {}: {}",
                invocation.program,
                code,
                stderr.trim()
            );
            return Err(RunnerError::NonZeroExit {
                program: invocation.program.clone(),
                code,
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8(output.stdout).map_err(|e| RunnerError::OutputDecode {
            program: invocation.program.clone(),
            message: e.to_string(),
        })?;

        debug!(
            "'{}' returned {} bytes of output",
            invocation.program,
            stdout.len()
        );

        Ok(ToolOutput { stdout, stderr })
    }
}
