//! Execution scheduler - determines which steps to run next

use crate::core::Pipeline;

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    Sequential,

    /// Execute all ready steps in parallel
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Sequential
    }
}

/// Scheduler for determining which steps to run
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    /// Get the next batch of steps to execute
    pub fn next_steps(&self, pipeline: &Pipeline) -> Vec<String> {
        let ready: Vec<String> = pipeline
            .ready_steps()
            .iter()
            .map(|s| s.id.clone())
            .collect();

        let running = pipeline.running_steps().len();

        match self.strategy {
            SchedulingStrategy::Sequential => {
                if running > 0 {
                    vec![]
                } else {
                    ready.into_iter().take(1).collect()
                }
            }
            SchedulingStrategy::Parallel => ready,
            SchedulingStrategy::LimitedParallel(max) => {
                let remaining = max.saturating_sub(running);
                ready.into_iter().take(remaining).collect()
            }
        }
    }
}
