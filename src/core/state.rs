//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Pipeline completed successfully
    Completed,
    /// Pipeline failed
    Failed,
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Step is waiting for dependencies (first execution)
    Pending,
    /// Step is waiting to be retried (preserves attempt count)
    Retrying { attempt: usize },
    /// Step is currently running
    Running {
        started_at: DateTime<Utc>,
        attempt: usize,
    },
    /// Step completed successfully
    Completed {
        stdout: String,
        attempts: usize,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed (all retries exhausted)
    Failed {
        error: String,
        attempts: usize,
        failed_at: DateTime<Utc>,
    },
    /// Step was skipped (QC disabled, or outputs already cached)
    Skipped { reason: String },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    /// Check if step is runnable (first run or queued retry)
    pub fn is_runnable(&self) -> bool {
        matches!(self, StepState::Pending | StepState::Retrying { .. })
    }
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of steps
    pub total_steps: usize,

    /// Number of completed steps
    pub completed_steps: usize,

    /// Number of failed steps
    pub failed_steps: usize,

    /// Number of skipped steps
    pub skipped_steps: usize,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_steps: 0,
            completed_steps: 0,
            failed_steps: 0,
            skipped_steps: 0,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self, total_steps: usize) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
        self.total_steps = total_steps;
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Update step counts
    pub fn update_counts(&mut self, completed: usize, failed: usize, skipped: usize) {
        self.completed_steps = completed;
        self.failed_steps = failed;
        self.skipped_steps = skipped;
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
