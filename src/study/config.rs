//! Study configuration - options bundle and the pipeline run entry point

use crate::{
    core::{Pipeline, StepState},
    execution::{ExecutionError, ExecutionEngine, SchedulingStrategy, StepExecutor},
    runner::{CommandRunner, StepRunner},
    study::{cache, RunReport},
};
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by a study run
#[derive(Debug, Error)]
pub enum StudyError {
    #[error("pipeline '{pipeline}' is missing required parameters: {parameters:?}")]
    MissingParameters {
        pipeline: String,
        parameters: Vec<String>,
    },

    #[error("failed to prepare output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("pipeline '{pipeline}' failed: steps {failed:?} did not complete")]
    PipelineFailed {
        pipeline: String,
        failed: Vec<String>,
    },

    #[error("failed to write run report: {0}")]
    Report(std::io::Error),
}

/// A named tool environment contributing variables to spawned processes
///
/// Mirrors the `modules` entry of the study options: a module like `fsl`
/// or `spm` carries the environment its tools need.
#[derive(Debug, Clone)]
pub struct StudyModule {
    pub name: String,
    pub env: Vec<(String, String)>,
}

impl StudyModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Execution option bundle for running pipelines within a study
#[derive(Debug, Clone)]
pub struct StudyConfig {
    /// Named tool environments merged into every spawned invocation
    pub modules: Vec<StudyModule>,

    /// Skip steps whose declared outputs already exist
    pub use_smart_caching: bool,

    /// Directory all pipeline outputs and reports land in
    pub output_directory: PathBuf,

    /// Worker count for parallel strategies
    pub number_of_cpus: usize,

    /// Write a JSON run report into the output directory
    pub generate_logging: bool,

    /// Schedule ready steps across workers; off forces sequential runs
    pub use_scheduler: bool,
}

impl StudyConfig {
    /// Create a configuration writing into `output_directory`
    pub fn new(output_directory: impl Into<PathBuf>) -> Self {
        Self {
            modules: Vec::new(),
            use_smart_caching: false,
            output_directory: output_directory.into(),
            number_of_cpus: 1,
            generate_logging: false,
            use_scheduler: false,
        }
    }

    pub fn with_module(mut self, module: StudyModule) -> Self {
        self.modules.push(module);
        self
    }

    pub fn with_use_smart_caching(mut self, enabled: bool) -> Self {
        self.use_smart_caching = enabled;
        self
    }

    pub fn with_number_of_cpus(mut self, cpus: usize) -> Self {
        self.number_of_cpus = cpus.max(1);
        self
    }

    pub fn with_generate_logging(mut self, enabled: bool) -> Self {
        self.generate_logging = enabled;
        self
    }

    pub fn with_use_scheduler(mut self, enabled: bool) -> Self {
        self.use_scheduler = enabled;
        self
    }

    /// Map the cpu/scheduler settings to a scheduling strategy
    pub fn strategy(&self) -> SchedulingStrategy {
        if self.use_scheduler && self.number_of_cpus > 1 {
            SchedulingStrategy::LimitedParallel(self.number_of_cpus)
        } else {
            SchedulingStrategy::Sequential
        }
    }

    /// Environment variables contributed by the configured modules
    fn module_env(&self) -> Vec<(String, String)> {
        self.modules
            .iter()
            .flat_map(|m| m.env.iter().cloned())
            .collect()
    }

    /// Run a pipeline with the local subprocess runner
    pub async fn run(
        &self,
        pipeline: &mut Pipeline,
        options: RunOptions,
    ) -> Result<RunReport, StudyError> {
        self.run_with(pipeline, options, CommandRunner::new()).await
    }

    /// Run a pipeline with an injected step runner
    pub async fn run_with<R: StepRunner + 'static>(
        &self,
        pipeline: &mut Pipeline,
        options: RunOptions,
        runner: R,
    ) -> Result<RunReport, StudyError> {
        let missing = pipeline.missing_parameters();
        if !missing.is_empty() {
            return Err(StudyError::MissingParameters {
                pipeline: pipeline.name.clone(),
                parameters: missing,
            });
        }

        std::fs::create_dir_all(&self.output_directory).map_err(|source| {
            StudyError::OutputDirectory {
                path: self.output_directory.clone(),
                source,
            }
        })?;

        if options.preview {
            // The preview option is accepted for compatibility but this
            // build ships no viewer; it never affects execution.
            info!("pipeline preview requested; no viewer available, continuing");
        }

        let mut variables: HashMap<String, String> = pipeline.parameter_values();
        variables.insert(
            "output_dir".to_string(),
            self.output_directory.display().to_string(),
        );

        if !options.run_qc_steps {
            skip_qc_steps(pipeline);
        }

        if self.use_smart_caching {
            let skipped = cache::skip_cached_steps(pipeline, &variables);
            if !skipped.is_empty() {
                info!("Smart caching skipped {} step(s): {:?}", skipped.len(), skipped);
            }
        }

        let executor = StepExecutor::new(runner).with_env(self.module_env());
        let mut engine =
            ExecutionEngine::new(executor, self.strategy()).with_variables(variables);

        // Verbose runs surface execution events at the default log level
        if options.verbose > 0 {
            engine.on_event(|event| info!("execution event: {:?}", event));
        } else {
            engine.on_event(|event| debug!("execution event: {:?}", event));
        }

        engine.execute(pipeline).await?;
        pipeline.refresh_state_counts();

        let report = RunReport::from_pipeline(pipeline);
        if self.generate_logging {
            let path = report
                .write_to(&self.output_directory)
                .map_err(StudyError::Report)?;
            info!("Run report written to {}", path.display());
        }

        if pipeline.has_failed() {
            return Err(StudyError::PipelineFailed {
                pipeline: pipeline.name.clone(),
                failed: pipeline.failed_steps(),
            });
        }

        Ok(report)
    }
}

/// Options for a single run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Execute steps flagged `qc: true` (off skips them)
    pub run_qc_steps: bool,

    /// Verbosity for run-time event logging
    pub verbose: u8,

    /// Accepted but inert: this build has no pipeline viewer
    pub preview: bool,
}

impl RunOptions {
    pub fn with_run_qc_steps(mut self, enabled: bool) -> Self {
        self.run_qc_steps = enabled;
        self
    }

    pub fn with_verbose(mut self, level: u8) -> Self {
        self.verbose = level;
        self
    }

    pub fn with_preview(mut self, enabled: bool) -> Self {
        self.preview = enabled;
        self
    }
}

/// Mark all QC steps as skipped
fn skip_qc_steps(pipeline: &mut Pipeline) {
    let qc_ids: Vec<String> = pipeline
        .steps
        .values()
        .filter(|s| s.qc && s.state.is_runnable())
        .map(|s| s.id.clone())
        .collect();

    for step_id in qc_ids {
        if let Some(step) = pipeline.step_mut(&step_id) {
            debug!("QC step {} disabled for this run", step_id);
            step.state = StepState::Skipped {
                reason: "qc steps disabled".to_string(),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PipelineConfig;
    use crate::runner::{RunnerError, ToolInvocation, ToolOutput};
    use std::sync::{Arc, Mutex};

    struct RecordingRunner {
        programs: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl StepRunner for RecordingRunner {
        async fn run(&self, invocation: &ToolInvocation) -> Result<ToolOutput, RunnerError> {
            self.programs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(invocation.program.clone());
            Ok(ToolOutput::new("ok"))
        }
    }

    const WITH_QC: &str = r#"
name: "with-qc"
parameters:
  source_dir: {}
steps:
  - id: "convert"
    name: "Convert"
    program: "dcm2niix"
    args: ["{{ source_dir }}"]
  - id: "qc_listing"
    name: "QC listing"
    program: "ls"
    depends_on: ["convert"]
    qc: true
"#;

    #[test]
    fn test_strategy_mapping() {
        let sequential = StudyConfig::new("/tmp/out").with_number_of_cpus(1);
        assert_eq!(sequential.strategy(), SchedulingStrategy::Sequential);

        let no_scheduler = StudyConfig::new("/tmp/out").with_number_of_cpus(4);
        assert_eq!(no_scheduler.strategy(), SchedulingStrategy::Sequential);

        let scheduled = StudyConfig::new("/tmp/out")
            .with_number_of_cpus(4)
            .with_use_scheduler(true);
        assert_eq!(
            scheduled.strategy(),
            SchedulingStrategy::LimitedParallel(4)
        );
    }

    #[tokio::test]
    async fn test_missing_parameters_rejected_before_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = PipelineConfig::from_yaml(WITH_QC).unwrap().to_pipeline();
        let study = StudyConfig::new(dir.path());

        let err = study
            .run_with(
                &mut pipeline,
                RunOptions::default(),
                RecordingRunner {
                    programs: Arc::new(Mutex::new(Vec::new())),
                },
            )
            .await
            .unwrap_err();

        match err {
            StudyError::MissingParameters { parameters, .. } => {
                assert_eq!(parameters, vec!["source_dir"]);
            }
            other => panic!("expected MissingParameters, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_qc_steps_skipped_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = PipelineConfig::from_yaml(WITH_QC).unwrap().to_pipeline();
        pipeline.set_parameter("source_dir", "/data/dicom").unwrap();

        let programs = Arc::new(Mutex::new(Vec::new()));
        let study = StudyConfig::new(dir.path());
        study
            .run_with(
                &mut pipeline,
                RunOptions::default(),
                RecordingRunner {
                    programs: Arc::clone(&programs),
                },
            )
            .await
            .unwrap();

        assert_eq!(*programs.lock().unwrap(), vec!["dcm2niix"]);
        assert!(matches!(
            pipeline.step("qc_listing").unwrap().state,
            StepState::Skipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_qc_steps_run_when_requested() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = PipelineConfig::from_yaml(WITH_QC).unwrap().to_pipeline();
        pipeline.set_parameter("source_dir", "/data/dicom").unwrap();

        let programs = Arc::new(Mutex::new(Vec::new()));
        let study = StudyConfig::new(dir.path());
        study
            .run_with(
                &mut pipeline,
                RunOptions::default().with_run_qc_steps(true),
                RecordingRunner {
                    programs: Arc::clone(&programs),
                },
            )
            .await
            .unwrap();

        assert_eq!(*programs.lock().unwrap(), vec!["dcm2niix", "ls"]);
    }

    const STDOUT_CHAIN: &str = r#"
name: "stdout-chain"
steps:
  - id: "scan"
    name: "Scan series"
    program: "dcm_scan"
    outputs: ["{{ output_dir }}/scan.json"]
  - id: "convert"
    name: "Convert"
    program: "dcm2niix"
    args: ["{{ steps.scan.stdout }}"]
    depends_on: ["scan"]
"#;

    #[tokio::test]
    async fn test_cached_skip_fails_dependent_stdout_reference() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("scan.json"), b"{}").unwrap();

        let mut pipeline = PipelineConfig::from_yaml(STDOUT_CHAIN)
            .unwrap()
            .to_pipeline();
        let programs = Arc::new(Mutex::new(Vec::new()));
        let study = StudyConfig::new(dir.path()).with_use_smart_caching(true);

        let err = study
            .run_with(
                &mut pipeline,
                RunOptions::default(),
                RecordingRunner {
                    programs: Arc::clone(&programs),
                },
            )
            .await
            .unwrap_err();

        match err {
            StudyError::PipelineFailed { failed, .. } => {
                assert_eq!(failed, vec!["convert"]);
            }
            other => panic!("expected PipelineFailed, got {:?}", other),
        }
        // The skipped step recorded no stdout; the raw marker must not
        // be handed to the tool
        assert!(programs.lock().unwrap().is_empty());
        match &pipeline.step("convert").unwrap().state {
            StepState::Failed { error, .. } => {
                assert!(error.contains("steps.scan.stdout"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_report_written_only_when_logging_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut pipeline = PipelineConfig::from_yaml(WITH_QC).unwrap().to_pipeline();
        pipeline.set_parameter("source_dir", "/data/dicom").unwrap();

        let study = StudyConfig::new(dir.path()).with_generate_logging(true);
        study
            .run_with(
                &mut pipeline,
                RunOptions::default(),
                RecordingRunner {
                    programs: Arc::new(Mutex::new(Vec::new())),
                },
            )
            .await
            .unwrap();

        let reports: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".run.json"))
            .collect();
        assert_eq!(reports.len(), 1);
    }
}
