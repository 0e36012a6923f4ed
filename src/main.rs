mod cli;
mod core;
mod datasets;
mod execution;
mod loader;
mod runner;
mod study;

use anyhow::{Context, Result};
use cli::commands::{ListCommand, RunCommand, ValidateCommand};
use cli::output::{format_status, format_step_state, style, CHECK, CROSS, INFO};
use cli::{Cli, Command};
use loader::PipelineLoader;
use std::path::PathBuf;
use study::{RunOptions, StudyConfig};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.verbose).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::List(cmd) => list_pipelines(cmd),
    }

    Ok(())
}

fn build_loader(extra_dirs: &[PathBuf]) -> PipelineLoader {
    let mut loader = PipelineLoader::new();
    // Prepend in reverse so the first --pipeline-dir wins
    for dir in extra_dirs.iter().rev() {
        loader = loader.with_search_path(dir);
    }
    loader
}

async fn run_pipeline(cmd: &RunCommand, verbose: bool) -> Result<()> {
    let loader = build_loader(&cmd.pipeline_dir);
    let mut pipeline = loader
        .get_pipeline_instance(&cmd.pipeline)
        .context("Failed to load pipeline")?;

    println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());

    for (key, value) in &cmd.param {
        pipeline
            .set_parameter(key, value.clone())
            .with_context(|| format!("Invalid parameter '{}'", key))?;
        println!(
            "{} Parameter: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    let study = StudyConfig::new(&cmd.output)
        .with_use_smart_caching(cmd.smart_caching)
        .with_number_of_cpus(cmd.workers)
        .with_use_scheduler(cmd.workers > 1)
        .with_generate_logging(!cmd.no_report);

    let options = RunOptions::default()
        .with_run_qc_steps(cmd.qc)
        .with_verbose(u8::from(verbose));

    let result = study.run(&mut pipeline, options).await;

    println!();
    for step_id in pipeline.execution_order() {
        if let Some(step) = pipeline.step(step_id) {
            println!("  {:<24} {}", step.id, format_step_state(&step.state));
        }
    }
    println!(
        "\n{} Pipeline {}: {}",
        if result.is_ok() { CHECK } else { CROSS },
        style(&pipeline.name).bold(),
        format_status(pipeline.state.status)
    );

    result.context("Pipeline run failed")?;
    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let loader = build_loader(&cmd.pipeline_dir);
    let pipeline = loader
        .get_pipeline_instance(&cmd.pipeline)
        .context("Validation failed")?;

    println!(
        "{} Pipeline {} is valid ({} steps)",
        CHECK,
        style(&pipeline.name).bold(),
        pipeline.steps.len()
    );

    let missing = pipeline.missing_parameters();
    if !missing.is_empty() {
        println!(
            "{} Required parameters: {}",
            INFO,
            style(missing.join(", ")).cyan()
        );
    }

    Ok(())
}

fn list_pipelines(cmd: &ListCommand) {
    let loader = build_loader(&cmd.pipeline_dir);
    let pipelines = loader.list();

    if pipelines.is_empty() {
        println!("{} No pipeline definitions found", INFO);
        return;
    }

    for (identifier, path) in pipelines {
        println!(
            "  {:<40} {}",
            style(identifier).bold(),
            style(path.display()).dim()
        );
    }
}
