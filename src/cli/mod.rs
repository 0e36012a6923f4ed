//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{ListCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Study-configured runner for DICOM-to-NIfTI conversion pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "studyrun")]
#[command(version = "0.1.0")]
#[command(about = "Run DICOM-to-NIfTI conversion pipelines", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline under a study configuration
    Run(RunCommand),

    /// Validate a pipeline definition
    Validate(ValidateCommand),

    /// List pipelines found on the search paths
    List(ListCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli = Cli::try_parse_from([
            "studyrun",
            "run",
            "dcmio.dcmconverter.dcm_to_nii",
            "-p",
            "source_dir=/data/dicom",
            "--output",
            "/tmp/out",
            "--workers",
            "2",
        ])
        .unwrap();

        match cli.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.pipeline, "dcmio.dcmconverter.dcm_to_nii");
                assert_eq!(
                    cmd.param,
                    vec![("source_dir".to_string(), "/data/dicom".to_string())]
                );
                assert_eq!(cmd.workers, 2);
            }
            other => panic!("expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_param_rejected() {
        let result = Cli::try_parse_from([
            "studyrun",
            "run",
            "dcmio.dcmconverter.dcm_to_nii",
            "-p",
            "not-a-pair",
        ]);
        assert!(result.is_err());
    }
}
