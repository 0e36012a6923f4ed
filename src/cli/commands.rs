//! CLI command definitions

use clap::Args;
use std::path::PathBuf;

/// Run a pipeline under a study configuration
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Pipeline identifier (dotted name) or path to a YAML definition
    pub pipeline: String,

    /// Pipeline parameter bindings (key=value)
    #[arg(short = 'p', long = "param", value_parser = parse_key_value)]
    pub param: Vec<(String, String)>,

    /// Output directory for conversion results and reports
    #[arg(short, long, default_value = "studyrun-output")]
    pub output: PathBuf,

    /// Worker count for parallel execution
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Extra pipeline search directory (repeatable)
    #[arg(long = "pipeline-dir")]
    pub pipeline_dir: Vec<PathBuf>,

    /// Skip steps whose declared outputs already exist
    #[arg(long)]
    pub smart_caching: bool,

    /// Don't write a JSON run report
    #[arg(long)]
    pub no_report: bool,

    /// Execute quality-control steps as well
    #[arg(long)]
    pub qc: bool,
}

/// Validate a pipeline definition
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Pipeline identifier (dotted name) or path to a YAML definition
    pub pipeline: String,

    /// Extra pipeline search directory (repeatable)
    #[arg(long = "pipeline-dir")]
    pub pipeline_dir: Vec<PathBuf>,
}

/// List pipelines found on the search paths
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Extra pipeline search directory (repeatable)
    #[arg(long = "pipeline-dir")]
    pub pipeline_dir: Vec<PathBuf>,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("source_dir=/data").unwrap(),
            ("source_dir".to_string(), "/data".to_string())
        );
        assert!(parse_key_value("bare").is_err());
    }
}
