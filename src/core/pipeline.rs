//! Pipeline domain model

use crate::core::{
    config::PipelineConfig,
    context::RunContext,
    state::{ExecutionStatus, PipelineState, StepState},
    step::{Step, StepDefaults},
};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Error raised when setting an input field the pipeline does not declare
#[derive(Debug, Error)]
#[error("pipeline '{pipeline}' has no parameter '{parameter}'")]
pub struct UnknownParameterError {
    pub pipeline: String,
    pub parameter: String,
}

/// A runnable pipeline instance
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Declared input parameters; `None` means not yet set
    parameters: HashMap<String, Option<String>>,

    /// Pipeline steps
    pub steps: HashMap<String, Step>,

    /// Execution state
    pub state: PipelineState,

    /// Step execution order (topological sort)
    execution_order: Vec<String>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let base = StepDefaults::default();
        let defaults = StepDefaults {
            max_retries: config.max_retries.unwrap_or(base.max_retries),
            timeout_secs: config.default_timeout_secs.unwrap_or(base.timeout_secs),
        };

        let steps: HashMap<String, Step> = config
            .steps
            .iter()
            .map(|step_config| {
                let step = Step::from_config(step_config, &defaults);
                (step.id.clone(), step)
            })
            .collect();

        let parameters = config
            .parameters
            .iter()
            .map(|(name, param)| (name.clone(), param.default.clone()))
            .collect();

        let execution_order = Self::topological_sort(&steps);

        Pipeline {
            name: config.name.clone(),
            parameters,
            steps,
            state: PipelineState::new(),
            execution_order,
        }
    }

    /// Set an input parameter; the name must be declared by the definition
    pub fn set_parameter(
        &mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), UnknownParameterError> {
        match self.parameters.get_mut(name) {
            Some(slot) => {
                *slot = Some(value.into());
                Ok(())
            }
            None => Err(UnknownParameterError {
                pipeline: self.name.clone(),
                parameter: name.to_string(),
            }),
        }
    }

    /// Get the current value of a parameter
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|v| v.as_deref())
    }

    /// Declared parameters that still have no value
    pub fn missing_parameters(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .parameters
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        missing.sort();
        missing
    }

    /// Resolved parameter values; empty entries are omitted
    pub fn parameter_values(&self) -> HashMap<String, String> {
        self.parameters
            .iter()
            .filter_map(|(name, value)| value.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    /// Get a step by ID
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.get(id)
    }

    /// Get a mutable step by ID
    pub fn step_mut(&mut self, id: &str) -> Option<&mut Step> {
        self.steps.get_mut(id)
    }

    /// Step IDs whose dependencies are satisfied (completed or skipped)
    pub fn satisfied_dependencies(&self) -> HashSet<String> {
        self.steps
            .values()
            .filter(|s| {
                matches!(
                    s.state,
                    StepState::Completed { .. } | StepState::Skipped { .. }
                )
            })
            .map(|s| s.id.clone())
            .collect()
    }

    /// Get steps ready to execute, in execution order
    pub fn ready_steps(&self) -> Vec<&Step> {
        let satisfied = self.satisfied_dependencies();
        self.execution_order
            .iter()
            .filter_map(|id| self.steps.get(id))
            .filter(|s| s.state.is_runnable() && s.dependencies_met(&satisfied))
            .collect()
    }

    /// Get all currently running steps
    pub fn running_steps(&self) -> Vec<&Step> {
        self.steps
            .values()
            .filter(|s| matches!(s.state, StepState::Running { .. }))
            .collect()
    }

    /// Check if all steps reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.steps.values().all(|s| s.state.is_terminal())
    }

    /// Check if pipeline has failed
    pub fn has_failed(&self) -> bool {
        self.state.status == ExecutionStatus::Failed
    }

    /// Step IDs in Failed state
    pub fn failed_steps(&self) -> Vec<String> {
        let mut failed: Vec<String> = self
            .steps
            .values()
            .filter(|s| matches!(s.state, StepState::Failed { .. }))
            .map(|s| s.id.clone())
            .collect();
        failed.sort();
        failed
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Calculate topological sort of steps based on dependencies
    fn topological_sort(steps: &HashMap<String, Step>) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        // Sort for deterministic order
        let mut step_ids: Vec<_> = steps.keys().cloned().collect();
        step_ids.sort();

        for step_id in step_ids {
            if !visited.contains(&step_id) {
                Self::visit(&step_id, steps, &mut visited, &mut result);
            }
        }

        result
    }

    fn visit(
        step_id: &str,
        steps: &HashMap<String, Step>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if visited.contains(step_id) {
            return;
        }
        visited.insert(step_id.to_string());

        if let Some(step) = steps.get(step_id) {
            for dep in &step.dependencies {
                Self::visit(dep, steps, visited, result);
            }
        }

        result.push(step_id.to_string());
    }

    /// Create the rendering context for a step
    pub fn create_context_for_step(
        &self,
        step_id: &str,
        base_variables: &HashMap<String, String>,
    ) -> RunContext {
        let mut context = RunContext::new();
        context.variables = base_variables.clone();

        for (id, step) in &self.steps {
            if let StepState::Completed { stdout, .. } = &step.state {
                context.set_step_stdout(id, stdout.clone());
            }
        }

        context.current_step_id = Some(step_id.to_string());
        context
    }

    /// Refresh the aggregate step counts on the pipeline state
    pub fn refresh_state_counts(&mut self) {
        let mut completed = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for step in self.steps.values() {
            match &step.state {
                StepState::Completed { .. } => completed += 1,
                StepState::Failed { .. } => failed += 1,
                StepState::Skipped { .. } => skipped += 1,
                _ => {}
            }
        }

        self.state.update_counts(completed, failed, skipped);
    }
}
