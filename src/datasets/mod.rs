//! Sample dataset provider - paths to bundled test fixtures

use std::path::PathBuf;
use thiserror::Error;

/// Environment variable overriding the bundled fixture directory
pub const SAMPLE_DATA_ENV: &str = "STUDYRUN_SAMPLE_DATA";

/// Known datasets: (name, description, fmridcm subdirectory)
const REGISTRY: &[(&str, &str, &str)] = &[(
    "localizer",
    "Single localizer acquisition, DICOM series",
    "localizer/fmridcm",
)];

/// Errors raised by sample dataset lookups
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unknown sample dataset '{name}'; known datasets: {known:?}")]
    Unknown { name: String, known: Vec<String> },

    #[error("sample dataset '{dataset}' is missing files at {path}")]
    Missing { dataset: String, path: PathBuf },
}

/// Handle to a bundled sample dataset
#[derive(Debug, Clone)]
pub struct SampleDataset {
    /// Dataset name as registered
    pub name: String,

    /// What the dataset contains
    pub description: String,

    /// Path to the DICOM series directory
    pub fmridcm: PathBuf,
}

/// Look up a bundled sample dataset by name
///
/// Fixtures live under the crate's `data/` directory unless
/// `STUDYRUN_SAMPLE_DATA` points somewhere else.
pub fn get_sample_data(name: &str) -> Result<SampleDataset, DatasetError> {
    let (reg_name, description, subdir) = REGISTRY
        .iter()
        .find(|(reg_name, _, _)| *reg_name == name)
        .ok_or_else(|| DatasetError::Unknown {
            name: name.to_string(),
            known: REGISTRY.iter().map(|(n, _, _)| n.to_string()).collect(),
        })?;

    let base = std::env::var(SAMPLE_DATA_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data"));

    let fmridcm = base.join(subdir);
    if !fmridcm.is_dir() {
        return Err(DatasetError::Missing {
            dataset: reg_name.to_string(),
            path: fmridcm,
        });
    }

    Ok(SampleDataset {
        name: reg_name.to_string(),
        description: description.to_string(),
        fmridcm,
    })
}
