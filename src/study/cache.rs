//! Smart caching - skip steps whose declared outputs already exist

use crate::core::{Pipeline, StepState};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

/// Mark steps as skipped when every declared output path is already present
///
/// Steps that declare no outputs are never cached; there is nothing to
/// check them against. A declared output directory only counts when it
/// contains at least one entry, so the empty layout left behind by an
/// interrupted run does not register as a cache hit. Returns the IDs of
/// the skipped steps.
pub fn skip_cached_steps(
    pipeline: &mut Pipeline,
    variables: &HashMap<String, String>,
) -> Vec<String> {
    let mut skipped = Vec::new();

    let candidates: Vec<String> = pipeline
        .steps
        .values()
        .filter(|s| s.state.is_runnable() && !s.outputs.is_empty())
        .filter(|s| {
            s.rendered_outputs(variables)
                .iter()
                .all(|path| output_present(path))
        })
        .map(|s| s.id.clone())
        .collect();

    for step_id in candidates {
        if let Some(step) = pipeline.step_mut(&step_id) {
            info!("Step {} outputs already present, skipping", step_id);
            step.state = StepState::Skipped {
                reason: "outputs already present".to_string(),
            };
            skipped.push(step_id);
        }
    }

    skipped.sort();
    skipped
}

/// An output file counts when it exists; an output directory only when
/// it is non-empty
fn output_present(path: &Path) -> bool {
    if path.is_dir() {
        std::fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    } else {
        path.is_file()
    }
}
