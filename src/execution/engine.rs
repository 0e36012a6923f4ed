//! Main execution engine - orchestrates the entire pipeline run

use crate::{
    core::{ExecutionStatus, Pipeline, StepState},
    execution::{ExecutionResult, ExecutionScheduler, SchedulingStrategy, StepExecutor},
    runner::StepRunner,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
    },
    StepStarted {
        step_id: String,
        attempt: usize,
    },
    StepRetrying {
        step_id: String,
        attempt: usize,
        max_retries: usize,
    },
    StepCompleted {
        step_id: String,
    },
    StepFailed {
        step_id: String,
        error: String,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Box<dyn Fn(&ExecutionEvent) + Send + Sync>;

/// Errors that abort the execution loop
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("pipeline stalled: steps {steps:?} can never become runnable")]
    Stalled { steps: Vec<String> },

    #[error("step task panicked: {0}")]
    Join(String),
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    executor: Arc<StepExecutor<R>>,
    scheduler: ExecutionScheduler,
    base_variables: HashMap<String, String>,
    handlers: Vec<EventHandler>,
}

impl<R: StepRunner + 'static> ExecutionEngine<R> {
    pub fn new(executor: StepExecutor<R>, strategy: SchedulingStrategy) -> Self {
        Self {
            executor: Arc::new(executor),
            scheduler: ExecutionScheduler::new(strategy),
            base_variables: HashMap::new(),
            handlers: Vec::new(),
        }
    }

    /// Variables every step template can reference (parameters, output_dir)
    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.base_variables = variables;
        self
    }

    /// Add an event handler
    pub fn on_event<F>(&mut self, handler: F)
    where
        F: Fn(&ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    fn emit(&self, event: &ExecutionEvent) {
        for handler in &self.handlers {
            handler(event);
        }
    }

    /// Execute the entire pipeline
    pub async fn execute(&self, pipeline: &mut Pipeline) -> Result<(), ExecutionError> {
        let execution_id = pipeline.state.execution_id;
        let pipeline_name = pipeline.name.clone();

        info!(
            "Starting pipeline execution: {} ({})",
            pipeline_name, execution_id
        );
        self.emit(&ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name: pipeline_name.clone(),
        });

        pipeline.state.start(pipeline.steps.len());

        while !pipeline.is_complete() && !pipeline.has_failed() {
            let batch = self.scheduler.next_steps(pipeline);

            if batch.is_empty() {
                // Batches drain synchronously, so an empty batch with
                // unfinished steps means nothing can ever run again.
                let stuck: Vec<String> = pipeline
                    .steps
                    .values()
                    .filter(|s| !s.state.is_terminal())
                    .map(|s| s.id.clone())
                    .collect();
                error!("No steps ready to run - pipeline stuck: {:?}", stuck);
                pipeline.state.fail();
                self.emit(&ExecutionEvent::PipelineCompleted {
                    execution_id,
                    status: ExecutionStatus::Failed,
                });
                return Err(ExecutionError::Stalled { steps: stuck });
            }

            let work = self.start_batch(pipeline, &batch);
            let results = self.run_batch(work).await?;

            for (step_id, result) in results {
                self.apply_result(pipeline, &step_id, result);
            }

            pipeline.refresh_state_counts();
        }

        let status = if pipeline.has_failed() {
            ExecutionStatus::Failed
        } else {
            pipeline.state.complete();
            ExecutionStatus::Completed
        };

        info!(
            "Pipeline execution finished: {} - {:?}",
            pipeline_name, status
        );
        self.emit(&ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        });

        Ok(())
    }

    /// Mark batch steps as running and collect the work to execute
    fn start_batch(
        &self,
        pipeline: &mut Pipeline,
        batch: &[String],
    ) -> Vec<(crate::core::Step, crate::core::RunContext)> {
        let mut work = Vec::with_capacity(batch.len());

        for step_id in batch {
            let (attempt, max_retries) = match pipeline.step(step_id) {
                Some(step) => match &step.state {
                    StepState::Pending => (1, step.max_retries),
                    StepState::Retrying { attempt } => (*attempt, step.max_retries),
                    _ => continue,
                },
                None => continue,
            };

            if let Some(step) = pipeline.step_mut(step_id) {
                step.state = StepState::Running {
                    started_at: chrono::Utc::now(),
                    attempt,
                };
            }

            self.emit(&ExecutionEvent::StepStarted {
                step_id: step_id.clone(),
                attempt,
            });
            if attempt > 1 {
                self.emit(&ExecutionEvent::StepRetrying {
                    step_id: step_id.clone(),
                    attempt,
                    max_retries,
                });
            }

            let context = pipeline.create_context_for_step(step_id, &self.base_variables);
            if let Some(step) = pipeline.step(step_id) {
                work.push((step.clone(), context));
            }
        }

        work
    }

    /// Execute a batch, concurrently when it holds more than one step
    async fn run_batch(
        &self,
        mut work: Vec<(crate::core::Step, crate::core::RunContext)>,
    ) -> Result<Vec<(String, ExecutionResult)>, ExecutionError> {
        if work.len() == 1 {
            let (step, context) = work.remove(0);
            let result = self.executor.execute(&step, &context).await;
            return Ok(vec![(step.id, result)]);
        }

        let mut set = JoinSet::new();
        for (step, context) in work {
            let executor = Arc::clone(&self.executor);
            set.spawn(async move {
                let result = executor.execute(&step, &context).await;
                (step.id, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => results.push(entry),
                Err(e) => return Err(ExecutionError::Join(e.to_string())),
            }
        }

        Ok(results)
    }

    /// Apply one step result to the pipeline: complete, retry, or fail
    fn apply_result(&self, pipeline: &mut Pipeline, step_id: &str, result: ExecutionResult) {
        let (started_at, attempt, max_retries) = match pipeline.step(step_id) {
            Some(step) => match &step.state {
                StepState::Running {
                    started_at,
                    attempt,
                } => (*started_at, *attempt, step.max_retries),
                _ => (chrono::Utc::now(), 1, step.max_retries),
            },
            None => return,
        };

        match result {
            ExecutionResult::Success { stdout } => {
                if let Some(step) = pipeline.step_mut(step_id) {
                    step.state = StepState::Completed {
                        stdout,
                        attempts: attempt,
                        started_at,
                        completed_at: chrono::Utc::now(),
                    };
                }
                self.emit(&ExecutionEvent::StepCompleted {
                    step_id: step_id.to_string(),
                });
            }
            ExecutionResult::Failed { error } => {
                if attempt <= max_retries {
                    warn!(
                        "Step {} failed on attempt {} of {}, will retry: {}",
                        step_id,
                        attempt,
                        max_retries + 1,
                        error
                    );
                    if let Some(step) = pipeline.step_mut(step_id) {
                        step.state = StepState::Retrying {
                            attempt: attempt + 1,
                        };
                    }
                } else {
                    if let Some(step) = pipeline.step_mut(step_id) {
                        step.state = StepState::Failed {
                            error: error.clone(),
                            attempts: attempt,
                            failed_at: chrono::Utc::now(),
                        };
                    }
                    self.emit(&ExecutionEvent::StepFailed {
                        step_id: step_id.to_string(),
                        error,
                    });
                    pipeline.state.fail();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineConfig;
    use crate::runner::{RunnerError, ToolInvocation, ToolOutput};
    use std::sync::atomic::{AtomicUsize, Ordering};

    // Mock runner that fails the first N invocations
    struct FlakyRunner {
        failures: AtomicUsize,
    }

    impl FlakyRunner {
        fn new(failures: usize) -> Self {
            Self {
                failures: AtomicUsize::new(failures),
            }
        }
    }

    #[async_trait::async_trait]
    impl crate::runner::StepRunner for FlakyRunner {
        async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, RunnerError> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RunnerError::NonZeroExit {
                    program: invocation.program.clone(),
                    code: 1,
                    stderr: "transient failure".to_string(),
                });
            }
            Ok(ToolOutput::new("ok"))
        }
    }

    const TWO_STEP: &str = r#"
name: "two-step"
steps:
  - id: "prepare"
    name: "Prepare"
    program: "mkdir"
    args: ["-p", "{{ output_dir }}"]
  - id: "convert"
    name: "Convert"
    program: "dcm2niix"
    depends_on: ["prepare"]
"#;

    fn output_dir_variables() -> HashMap<String, String> {
        HashMap::from([("output_dir".to_string(), "/tmp/out".to_string())])
    }

    #[tokio::test]
    async fn test_execute_simple_pipeline() {
        let config = PipelineConfig::from_yaml(TWO_STEP).unwrap();
        let mut pipeline = config.to_pipeline();

        let executor = StepExecutor::new(FlakyRunner::new(0));
        let engine = ExecutionEngine::new(executor, SchedulingStrategy::Sequential)
            .with_variables(output_dir_variables());

        engine.execute(&mut pipeline).await.unwrap();
        assert!(pipeline.is_complete());
        assert_eq!(pipeline.state.status, ExecutionStatus::Completed);
        assert_eq!(pipeline.state.completed_steps, 2);
    }

    #[tokio::test]
    async fn test_execute_retries_then_succeeds() {
        let yaml = r#"
name: "retrying"
max_retries: 2
steps:
  - id: "convert"
    name: "Convert"
    program: "dcm2niix"
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let mut pipeline = config.to_pipeline();

        let executor = StepExecutor::new(FlakyRunner::new(2));
        let engine = ExecutionEngine::new(executor, SchedulingStrategy::Sequential);

        engine.execute(&mut pipeline).await.unwrap();
        match &pipeline.step("convert").unwrap().state {
            StepState::Completed { attempts, .. } => assert_eq!(*attempts, 3),
            other => panic!("expected Completed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_fails_after_exhausted_retries() {
        let yaml = r#"
name: "failing"
max_retries: 1
steps:
  - id: "convert"
    name: "Convert"
    program: "dcm2niix"
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let mut pipeline = config.to_pipeline();

        let executor = StepExecutor::new(FlakyRunner::new(5));
        let engine = ExecutionEngine::new(executor, SchedulingStrategy::Sequential);

        engine.execute(&mut pipeline).await.unwrap();
        assert!(pipeline.has_failed());
        assert_eq!(pipeline.failed_steps(), vec!["convert"]);
        match &pipeline.step("convert").unwrap().state {
            StepState::Failed { attempts, .. } => assert_eq!(*attempts, 2),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_execute_parallel_fan_in() {
        let yaml = r#"
name: "fan-in"
steps:
  - id: "series_a"
    name: "Series A"
    program: "dcm2niix"
  - id: "series_b"
    name: "Series B"
    program: "dcm2niix"
  - id: "merge"
    name: "Merge"
    program: "fslmerge"
    depends_on: ["series_a", "series_b"]
"#;
        let config = PipelineConfig::from_yaml(yaml).unwrap();
        let mut pipeline = config.to_pipeline();

        let executor = StepExecutor::new(FlakyRunner::new(0));
        let engine = ExecutionEngine::new(executor, SchedulingStrategy::LimitedParallel(2));

        engine.execute(&mut pipeline).await.unwrap();
        assert!(pipeline.is_complete());
        assert_eq!(pipeline.state.completed_steps, 3);
    }

    #[tokio::test]
    async fn test_events_are_emitted_in_order() {
        let config = PipelineConfig::from_yaml(TWO_STEP).unwrap();
        let mut pipeline = config.to_pipeline();

        let executor = StepExecutor::new(FlakyRunner::new(0));
        let mut engine = ExecutionEngine::new(executor, SchedulingStrategy::Sequential)
            .with_variables(output_dir_variables());

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.on_event(move |event| {
            let label = match event {
                ExecutionEvent::PipelineStarted { .. } => "started",
                ExecutionEvent::StepStarted { .. } => "step",
                ExecutionEvent::StepCompleted { .. } => "done",
                ExecutionEvent::PipelineCompleted { .. } => "finished",
                _ => "other",
            };
            sink.lock().unwrap_or_else(|e| e.into_inner()).push(label);
        });

        engine.execute(&mut pipeline).await.unwrap();

        let seen = seen.lock().unwrap_or_else(|e| e.into_inner());
        assert_eq!(
            *seen,
            vec!["started", "step", "done", "step", "done", "finished"]
        );
    }
}
