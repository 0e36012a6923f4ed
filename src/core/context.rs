//! Run context - variables visible to a step's templates

use std::collections::HashMap;

/// Per-step rendering context for a pipeline run
///
/// Carries the resolved pipeline parameters plus the captured stdout of
/// every step that has already completed.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    /// Resolved parameter values and builtins (e.g. `output_dir`)
    pub variables: HashMap<String, String>,

    /// Captured stdout from completed steps (step_id -> stdout)
    pub step_stdout: HashMap<String, String>,

    /// The step this context was built for
    pub current_step_id: Option<String>,
}

impl RunContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the stdout of a completed step
    pub fn set_step_stdout(&mut self, step_id: &str, stdout: String) {
        self.step_stdout.insert(step_id.to_string(), stdout);
    }

    /// All variables available for template rendering
    pub fn rendering_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();
        for (step_id, stdout) in &self.step_stdout {
            vars.insert(format!("steps.{}.stdout", step_id), stdout.trim().to_string());
        }
        vars
    }
}
