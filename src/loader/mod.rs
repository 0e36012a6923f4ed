//! Pipeline loader - resolves pipeline identifiers to runnable instances

use crate::core::{Pipeline, PipelineConfig};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Environment variable holding extra search directories (colon-separated)
pub const PIPELINE_PATH_ENV: &str = "STUDYRUN_PIPELINE_PATH";

/// File extension of pipeline definitions
const PIPELINE_EXTENSION: &str = "yaml";

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .unwrap_or_else(|e| unreachable!("invalid identifier regex: {e}"))
    })
}

/// Errors raised while resolving or loading a pipeline definition
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid pipeline identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("pipeline '{name}' not found; searched {searched:?}")]
    NotFound {
        name: String,
        searched: Vec<PathBuf>,
    },

    #[error("failed to load pipeline definition {path}: {source}")]
    Definition {
        path: PathBuf,
        source: anyhow::Error,
    },
}

/// Resolves dotted pipeline identifiers against ordered search directories
///
/// `dcmio.dcmconverter.dcm_to_nii` maps to
/// `dcmio/dcmconverter/dcm_to_nii.yaml` under the first search directory
/// that contains it. Direct file paths are accepted as-is.
#[derive(Debug, Clone)]
pub struct PipelineLoader {
    search_paths: Vec<PathBuf>,
}

impl PipelineLoader {
    /// Create a loader with the default search directories:
    /// `$STUDYRUN_PIPELINE_PATH` entries, then the user config dir.
    pub fn new() -> Self {
        let mut search_paths = Vec::new();

        if let Ok(raw) = std::env::var(PIPELINE_PATH_ENV) {
            for entry in raw.split(':').filter(|e| !e.is_empty()) {
                search_paths.push(PathBuf::from(entry));
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            search_paths.push(config_dir.join("studyrun").join("pipelines"));
        }

        Self { search_paths }
    }

    /// Prepend a search directory (takes priority over the defaults)
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.insert(0, path.into());
        self
    }

    /// Resolve an identifier or file path and build a runnable pipeline
    pub fn get_pipeline_instance(&self, name: &str) -> Result<Pipeline, LoadError> {
        let path = self.resolve(name)?;
        debug!("Loading pipeline '{}' from {}", name, path.display());
        let config = PipelineConfig::from_file(&path).map_err(|source| LoadError::Definition {
            path: path.clone(),
            source,
        })?;
        Ok(config.to_pipeline())
    }

    /// Resolve an identifier or file path to a definition file
    pub fn resolve(&self, name: &str) -> Result<PathBuf, LoadError> {
        // Direct file path
        let as_path = Path::new(name);
        if as_path.extension().is_some() && as_path.is_file() {
            return Ok(as_path.to_path_buf());
        }

        if !identifier_regex().is_match(name) {
            return Err(LoadError::InvalidIdentifier(name.to_string()));
        }

        let mut relative: PathBuf = name.split('.').collect();
        relative.set_extension(PIPELINE_EXTENSION);

        for dir in &self.search_paths {
            let candidate = dir.join(&relative);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }

        Err(LoadError::NotFound {
            name: name.to_string(),
            searched: self.search_paths.clone(),
        })
    }

    /// Enumerate definitions under the search paths as (identifier, path)
    pub fn list(&self) -> Vec<(String, PathBuf)> {
        let mut found = Vec::new();
        for dir in &self.search_paths {
            collect_definitions(dir, dir, &mut found);
        }
        found.sort();
        found.dedup_by(|a, b| a.0 == b.0);
        found
    }
}

impl Default for PipelineLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_definitions(root: &Path, dir: &Path, found: &mut Vec<(String, PathBuf)>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_definitions(root, &path, found);
        } else if path.extension().and_then(|e| e.to_str()) == Some(PIPELINE_EXTENSION) {
            if let Ok(relative) = path.strip_prefix(root) {
                let identifier = relative
                    .with_extension("")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join(".");
                found.push((identifier, path));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"
name: "DICOM to NIfTI"
parameters:
  source_dir: {}
steps:
  - id: "convert"
    name: "Convert"
    program: "dcm2niix"
    args: ["{{ source_dir }}"]
"#;

    fn definition_tree() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("dcmio").join("dcmconverter");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("dcm_to_nii.yaml"), DEFINITION).unwrap();
        dir
    }

    #[test]
    fn test_resolve_dotted_identifier() {
        let dir = definition_tree();
        let loader = PipelineLoader::new().with_search_path(dir.path());

        let pipeline = loader
            .get_pipeline_instance("dcmio.dcmconverter.dcm_to_nii")
            .unwrap();
        assert_eq!(pipeline.name, "DICOM to NIfTI");
    }

    #[test]
    fn test_resolve_direct_file_path() {
        let dir = definition_tree();
        let file = dir
            .path()
            .join("dcmio")
            .join("dcmconverter")
            .join("dcm_to_nii.yaml");
        let loader = PipelineLoader::new();

        let pipeline = loader
            .get_pipeline_instance(&file.display().to_string())
            .unwrap();
        assert_eq!(pipeline.name, "DICOM to NIfTI");
    }

    #[test]
    fn test_unknown_pipeline_reports_searched_paths() {
        let dir = definition_tree();
        let loader = PipelineLoader::new().with_search_path(dir.path());

        let err = loader.get_pipeline_instance("dcmio.missing").unwrap_err();
        match err {
            LoadError::NotFound { name, searched } => {
                assert_eq!(name, "dcmio.missing");
                assert!(searched.contains(&dir.path().to_path_buf()));
            }
            other => panic!("expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let loader = PipelineLoader::new();
        let err = loader.get_pipeline_instance("../escape").unwrap_err();
        assert!(matches!(err, LoadError::InvalidIdentifier(_)));
    }

    #[test]
    fn test_list_definitions() {
        let dir = definition_tree();
        let loader = PipelineLoader {
            search_paths: vec![dir.path().to_path_buf()],
        };

        let listed = loader.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "dcmio.dcmconverter.dcm_to_nii");
    }
}
