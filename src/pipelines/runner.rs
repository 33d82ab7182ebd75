//! Sequential executor for a built workflow.
//!
//! Tasks run strictly in append order; each must finish before the next
//! starts. External tools go through `tokio::process`, in-process actions
//! through the blocking pool.

use std::fs::File;
use std::process::Stdio;
use std::time::Instant;
use anyhow::anyhow;
use log::{debug, info};
use tokio::process::Command as TokioCommand;
use crate::config::defs::PipelineError;
use crate::pipelines::contamination::run_contamination_gate;
use crate::pipelines::mapping::{run_autosome_ratio, run_mapping_summary};
use crate::pipelines::workflow::{Action, Command, Task, Workflow};
use crate::utils::command::{generate_cli, Invocation};
use crate::utils::fastq::{downsample_fastq, trim_fastq};
use crate::utils::sambam::merge_sam_files;


/// Distinct external tools a workflow calls, in first-use order.
pub fn required_tools(workflow: &Workflow) -> Vec<&'static str> {
    let mut tools = Vec::new();
    for task in &workflow.tasks {
        if matches!(task.command, Command::InProcess(_)) {
            continue;
        }
        if !tools.contains(&task.tool()) {
            tools.push(task.tool());
        }
    }
    tools
}

/// Executes every task in order, or only prints them when `dry_run` is set.
pub async fn run_workflow(workflow: &Workflow, dry_run: bool) -> Result<(), PipelineError> {
    let total = workflow.len();
    for (i, task) in workflow.tasks.iter().enumerate() {
        let start = Instant::now();
        match &task.command {
            Command::InProcess(action) => {
                if dry_run {
                    println!("# [{}] in-process {:?}", task.name, action);
                    continue;
                }
                info!("[{}/{}] {} (in-process)", i + 1, total, task.name);
                run_action(task.clone(), action.clone()).await?;
            }
            _ => {
                let invocation = generate_cli(task)?;
                if dry_run {
                    println!("{}", invocation.to_shell());
                    continue;
                }
                info!("[{}/{}] {}", i + 1, total, task.name);
                debug!("{}", invocation.to_shell());
                execute(task.tool(), &invocation).await?;
            }
        }
        debug!("{} finished in {} ms", task.name, start.elapsed().as_millis());
    }
    Ok(())
}

async fn execute(tool: &str, invocation: &Invocation) -> Result<(), PipelineError> {
    let mut cmd = TokioCommand::new(&invocation.program);
    cmd.args(&invocation.args).stdin(Stdio::null());
    if let Some(out) = &invocation.stdout {
        cmd.stdout(Stdio::from(File::create(out)?));
    }
    if let Some(err) = &invocation.stderr {
        cmd.stderr(Stdio::from(File::create(err)?));
    }

    let output = cmd.output().await.map_err(|e| PipelineError::ToolExecution {
        tool: tool.to_string(),
        error: format!("failed to spawn: {}", e),
    })?;
    if !output.status.success() {
        let detail = match &invocation.stderr {
            Some(path) => format!("stderr in {}", path.display()),
            None => String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        return Err(PipelineError::ToolExecution {
            tool: tool.to_string(),
            error: format!("{} ({})", output.status, detail),
        });
    }
    Ok(())
}

async fn run_action(task: Task, action: Action) -> Result<(), PipelineError> {
    tokio::task::spawn_blocking(move || dispatch(&task, &action))
        .await
        .map_err(|e| PipelineError::Other(anyhow!("In-process task panicked: {}", e)))?
}

fn count_param(task: &Task, key: &str) -> Result<usize, PipelineError> {
    let value = task.param(key)?;
    value
        .parse()
        .map_err(|_| PipelineError::InvalidConfig(format!("{}: '{}' is not a count for {}", task.name, value, key)))
}

fn dispatch(task: &Task, action: &Action) -> Result<(), PipelineError> {
    match action {
        Action::MergeSam => {
            let inputs = task.input_files("sams")?;
            let lines = merge_sam_files(&inputs, task.output_file("sam")?)?;
            debug!("{}: merged {} alignments from {} files", task.name, lines, inputs.len());
        }
        Action::TrimReads => {
            let trim = count_param(task, "trim")?;
            let inputs = task.input_files("fastq")?;
            let outputs = task.outputs.get("fastq").map(|a| a.paths()).unwrap_or_default();
            if inputs.len() != outputs.len() {
                return Err(PipelineError::InvalidConfig(format!("{}: read inputs and outputs differ in count", task.name)));
            }
            for (input, output) in inputs.iter().zip(outputs) {
                trim_fastq(input, output, trim)?;
            }
        }
        Action::Downsample => {
            let reads = count_param(task, "reads")?;
            downsample_fastq(task.input_file("fastq")?, task.output_file("fastq")?, reads)?;
        }
        Action::ContaminationGate { declared, samples, species } => {
            run_contamination_gate(task, declared, samples, species)?;
        }
        Action::AutosomeRatio { samples } => {
            run_autosome_ratio(task, samples)?;
        }
        Action::MappingSummary { samples } => {
            run_mapping_summary(task, samples)?;
        }
    }
    Ok(())
}
