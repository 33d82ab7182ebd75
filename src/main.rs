use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use log::{self, LevelFilter, debug, info, error, warn};
use env_logger::Builder;
use seqmap_pipelines::cli::{self, Arguments};
use seqmap_pipelines::config::defs::PipelineError;
use seqmap_pipelines::config::run::RunConfiguration;
use seqmap_pipelines::pipelines::build_workflow;
use seqmap_pipelines::pipelines::runner::{required_tools, run_workflow};
use seqmap_pipelines::pipelines::workflow::Workflow;
use seqmap_pipelines::utils::command::check_versions;


#[tokio::main]
async fn main() -> Result<()> {
    let run_start = Instant::now();

    let args = cli::parse();

    let log_level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(log_level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    println!("\n-------------\n SeqMap\n-------------\n");

    if let Err(e) = run(args).await {
        error!("Pipeline failed: {} at {} milliseconds.", e, run_start.elapsed().as_millis());
        std::process::exit(1);
    }

    println!("Run complete: {} milliseconds.", run_start.elapsed().as_millis());
    Ok(())
}


async fn run(args: Arguments) -> Result<(), PipelineError> {
    let mut config = RunConfiguration::from_file(Path::new(&args.config))?;
    config.apply_overrides(&args);
    config.validate()?;
    info!(
        "{} samples, {} input, mapper {}, {} threads",
        config.samples.len(),
        config.seq_type,
        config.mapper,
        config.threads
    );

    let workflow = build_workflow(&config, !args.skip_contamination);
    info!("Built workflow with {} tasks", workflow.len());

    for (i, name, path) in workflow.unproduced_inputs() {
        warn!("Task {} input '{}' ({}) is not produced by an earlier step", i + 1, name, path.display());
    }

    if let Some(plan) = &args.plan {
        write_plan(&workflow, Path::new(plan))?;
        info!("Workflow plan written to {}", plan);
    }

    if !args.dry_run && !args.skip_tool_check {
        let tools = required_tools(&workflow);
        debug!("Checking external tools: {:?}", tools);
        check_versions(tools).await?;
    }

    run_workflow(&workflow, args.dry_run).await
}


/// Serializes the workflow as pretty JSON.
fn write_plan(workflow: &Workflow, path: &Path) -> Result<(), PipelineError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, workflow).map_err(|e| PipelineError::Other(e.into()))?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
