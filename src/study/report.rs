//! Run report - JSON summary written when logging is enabled

use crate::core::{ExecutionStatus, Pipeline, StepState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub execution_id: Uuid,
    pub pipeline: String,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepReport>,
}

/// Per-step entry in the run report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub id: String,
    pub name: String,
    pub status: String,
    pub attempts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<String>,
}

impl RunReport {
    /// Build a report from the final pipeline state
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        let steps = pipeline
            .execution_order()
            .iter()
            .filter_map(|id| pipeline.step(id))
            .map(|step| {
                let (status, attempts, error, skipped_reason) = match &step.state {
                    StepState::Pending => ("pending", 0, None, None),
                    StepState::Retrying { attempt } => ("retrying", *attempt, None, None),
                    StepState::Running { attempt, .. } => ("running", *attempt, None, None),
                    StepState::Completed { attempts, .. } => ("completed", *attempts, None, None),
                    StepState::Failed {
                        error, attempts, ..
                    } => ("failed", *attempts, Some(error.clone()), None),
                    StepState::Skipped { reason } => ("skipped", 0, None, Some(reason.clone())),
                };
                StepReport {
                    id: step.id.clone(),
                    name: step.name.clone(),
                    status: status.to_string(),
                    attempts,
                    error,
                    skipped_reason,
                }
            })
            .collect();

        Self {
            execution_id: pipeline.state.execution_id,
            pipeline: pipeline.name.clone(),
            status: pipeline.state.status,
            started_at: pipeline.state.started_at,
            completed_at: pipeline.state.completed_at,
            steps,
        }
    }

    /// File name for this report within the output directory
    fn file_name(&self) -> String {
        let slug: String = self
            .pipeline
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        format!("{}_{}.run.json", slug, self.execution_id)
    }

    /// Write the report as pretty JSON into `dir`, returning the path
    pub fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(self.file_name());
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}
