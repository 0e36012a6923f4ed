//! Step domain model

use crate::core::config::{render_template, StepConfig};
use crate::core::state::StepState;
use crate::runner::ToolInvocation;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

/// A single step in a pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// External program to invoke
    pub program: String,

    /// Argument templates, rendered per run
    pub args: Vec<String>,

    /// List of step IDs this step depends on
    pub dependencies: Vec<String>,

    /// Templated paths this step produces
    pub outputs: Vec<String>,

    /// Quality-control step, gated by the run options
    pub qc: bool,

    /// Maximum number of retries
    pub max_retries: usize,

    /// Timeout in seconds
    pub timeout_secs: u64,

    /// Runtime state (not serialized)
    pub state: StepState,
}

impl Step {
    /// Create a step from a step config
    pub fn from_config(config: &StepConfig, defaults: &StepDefaults) -> Self {
        Step {
            id: config.id.clone(),
            name: config.name.clone(),
            program: config.program.clone(),
            args: config.args.clone(),
            dependencies: config.depends_on.clone(),
            outputs: config.outputs.clone(),
            qc: config.qc,
            max_retries: config.max_retries.unwrap_or(defaults.max_retries),
            timeout_secs: config.timeout_secs.unwrap_or(defaults.timeout_secs),
            state: StepState::Pending,
        }
    }

    /// Check if all dependencies are satisfied
    pub fn dependencies_met(&self, satisfied: &HashSet<String>) -> bool {
        self.dependencies.iter().all(|dep| satisfied.contains(dep))
    }

    /// Render the program and arguments into a runnable invocation
    pub fn render_invocation(
        &self,
        variables: &HashMap<String, String>,
        env: &[(String, String)],
    ) -> ToolInvocation {
        ToolInvocation {
            program: render_template(&self.program, variables),
            args: self
                .args
                .iter()
                .map(|arg| render_template(arg, variables))
                .collect(),
            env: env.to_vec(),
        }
    }

    /// Render the declared output paths
    pub fn rendered_outputs(&self, variables: &HashMap<String, String>) -> Vec<PathBuf> {
        self.outputs
            .iter()
            .map(|out| PathBuf::from(render_template(out, variables)))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct StepDefaults {
    pub max_retries: usize,
    pub timeout_secs: u64,
}

impl Default for StepDefaults {
    fn default() -> Self {
        Self {
            max_retries: 0,
            timeout_secs: 3600, // conversions of large series can be slow
        }
    }
}
