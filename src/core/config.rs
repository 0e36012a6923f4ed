//! Pipeline configuration from YAML

use crate::core::Pipeline;
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

/// Variables every pipeline can reference without declaring them
pub const BUILTIN_VARIABLES: &[&str] = &["output_dir"];

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.]*)\s*\}\}")
            .unwrap_or_else(|e| unreachable!("invalid placeholder regex: {e}"))
    })
}

fn step_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .unwrap_or_else(|e| unreachable!("invalid step id regex: {e}"))
    })
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Human-readable description
    #[serde(default)]
    pub description: Option<String>,

    /// Declared input parameters, settable before a run
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterConfig>,

    /// Pipeline steps
    pub steps: Vec<StepConfig>,

    /// Maximum number of retries per step (global default)
    #[serde(default)]
    pub max_retries: Option<usize>,

    /// Default timeout for steps (in seconds)
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// Declaration of a pipeline input parameter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// What the parameter means (shown by `studyrun validate`)
    #[serde(default)]
    pub description: Option<String>,

    /// Default value; parameters without one must be set before running
    #[serde(default)]
    pub default: Option<String>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Unique step identifier
    pub id: String,

    /// Human-readable step name
    pub name: String,

    /// Optional step description
    #[serde(default)]
    pub description: Option<String>,

    /// The external program this step invokes
    pub program: String,

    /// Program arguments; `{{ placeholder }}` templates are rendered per run
    #[serde(default)]
    pub args: Vec<String>,

    /// List of step IDs this step depends on
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Paths this step produces (templated); used for smart caching
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Quality-control step: only runs when QC execution is requested
    #[serde(default)]
    pub qc: bool,

    /// Maximum retries for this step (overrides global)
    #[serde(default)]
    pub max_retries: Option<usize>,

    /// Timeout for this step (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            anyhow::bail!("Pipeline '{}' defines no steps", self.name);
        }

        // Check that all step IDs are well-formed and unique
        let mut seen_ids = HashSet::new();
        for step in &self.steps {
            if !step_id_regex().is_match(&step.id) {
                anyhow::bail!("Invalid step ID: '{}'", step.id);
            }
            if !seen_ids.insert(&step.id) {
                anyhow::bail!("Duplicate step ID: {}", step.id);
            }
        }

        // Check that all dependencies reference existing steps
        let step_ids: HashSet<_> = self.steps.iter().map(|s| &s.id).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                if !step_ids.contains(dep) {
                    anyhow::bail!("Step '{}' depends on non-existent step '{}'", step.id, dep);
                }
            }
        }

        // Every template placeholder must resolve to something at run time
        for step in &self.steps {
            for template in std::iter::once(&step.program)
                .chain(step.args.iter())
                .chain(step.outputs.iter())
            {
                for capture in placeholder_regex().captures_iter(template) {
                    let name = &capture[1];
                    if !self.is_known_placeholder(name) {
                        anyhow::bail!(
                            "Step '{}' references undeclared placeholder '{}'",
                            step.id,
                            name
                        );
                    }
                }
            }
        }

        self.check_cycles()?;

        Ok(())
    }

    /// A placeholder is known if it is a declared parameter, a builtin,
    /// or the captured stdout of a defined step.
    fn is_known_placeholder(&self, name: &str) -> bool {
        if self.parameters.contains_key(name) || BUILTIN_VARIABLES.contains(&name) {
            return true;
        }
        if let Some(step_id) = name
            .strip_prefix("steps.")
            .and_then(|rest| rest.strip_suffix(".stdout"))
        {
            return self.steps.iter().any(|s| s.id == step_id);
        }
        false
    }

    /// Check for cycles in the step dependency graph
    fn check_cycles(&self) -> Result<()> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for step in &self.steps {
            if !visited.contains(&step.id) {
                self.dfs_check(&step.id, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        &self,
        step_id: &str,
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<()> {
        visited.insert(step_id.to_string());
        recursion_stack.insert(step_id.to_string());

        if let Some(step) = self.steps.iter().find(|s| s.id == step_id) {
            for dep in &step.depends_on {
                if recursion_stack.contains(dep) {
                    anyhow::bail!("Cycle detected in dependency graph involving step '{}'", dep);
                }
                if !visited.contains(dep) {
                    self.dfs_check(dep, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(step_id);
        Ok(())
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Pipeline {
        Pipeline::from_config(self)
    }
}

/// Placeholder markers left unrendered in `text`
pub(crate) fn unresolved_placeholders(text: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Render a template against a variable map, replacing `{{ name }}` markers
pub(crate) fn render_template(
    template: &str,
    variables: &std::collections::HashMap<String, String>,
) -> String {
    placeholder_regex()
        .replace_all(template, |caps: &regex::Captures<'_>| {
            variables
                .get(&caps[1])
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
name: "minimal"
parameters:
  source_dir:
    description: "Input DICOM directory"
steps:
  - id: "convert"
    name: "Convert"
    program: "dcm2niix"
    args: ["-o", "{{ output_dir }}", "{{ source_dir }}"]
"#;

    #[test]
    fn test_parse_minimal_pipeline() {
        let config = PipelineConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.name, "minimal");
        assert_eq!(config.steps.len(), 1);
        assert!(config.parameters.contains_key("source_dir"));
    }

    #[test]
    fn test_empty_pipeline_fails() {
        let yaml = r#"
name: "empty"
steps: []
"#;
        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_step_id_fails() {
        let yaml = r#"
name: "dup"
steps:
  - id: "convert"
    name: "First"
    program: "true"
  - id: "convert"
    name: "Duplicate"
    program: "true"
"#;
        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_dependency_fails() {
        let yaml = r#"
name: "bad-dep"
steps:
  - id: "convert"
    name: "Convert"
    program: "true"
    depends_on: ["nonexistent"]
"#;
        assert!(PipelineConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_dependency_cycle_fails() {
        let yaml = r#"
name: "cycle"
steps:
  - id: "a"
    name: "A"
    program: "true"
    depends_on: ["b"]
  - id: "b"
    name: "B"
    program: "true"
    depends_on: ["a"]
"#;
        let err = PipelineConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Cycle"));
    }

    #[test]
    fn test_undeclared_placeholder_fails() {
        let yaml = r#"
name: "bad-placeholder"
steps:
  - id: "convert"
    name: "Convert"
    program: "dcm2niix"
    args: ["{{ missing_param }}"]
"#;
        let err = PipelineConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("missing_param"));
    }

    #[test]
    fn test_step_stdout_placeholder_is_known() {
        let yaml = r#"
name: "chained"
steps:
  - id: "scan"
    name: "Scan"
    program: "ls"
  - id: "report"
    name: "Report"
    program: "echo"
    args: ["{{ steps.scan.stdout }}"]
    depends_on: ["scan"]
"#;
        assert!(PipelineConfig::from_yaml(yaml).is_ok());
    }

    #[test]
    fn test_render_template() {
        let mut vars = std::collections::HashMap::new();
        vars.insert("source_dir".to_string(), "/data/dicom".to_string());
        let rendered = render_template("{{ source_dir }}/series", &vars);
        assert_eq!(rendered, "/data/dicom/series");
    }

    #[test]
    fn test_render_template_leaves_unknown_markers() {
        let vars = std::collections::HashMap::new();
        let rendered = render_template("{{ nope }}", &vars);
        assert_eq!(rendered, "{{ nope }}");
    }
}
