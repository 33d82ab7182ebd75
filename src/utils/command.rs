/// Functions and structs for turning tasks into command-line invocations

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use anyhow::anyhow;
use log::debug;
use tokio::process::Command;
use crate::config::defs::{PipelineError, AWK_TAG, BOWTIE_TAG, BWA_TAG, LN_TAG, SAMTOOLS_TAG};
use crate::pipelines::workflow::{Command as TaskCommand, Task};


/// A fully rendered external call, with optional stream redirections.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

impl Invocation {
    fn new(program: &str, args: Vec<String>) -> Self {
        Invocation {
            program: program.to_string(),
            args,
            stdout: None,
            stderr: None,
        }
    }

    /// Shell-like rendering for logs and dry runs.
    pub fn to_shell(&self) -> String {
        let mut line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        if let Some(out) = &self.stdout {
            line.push_str(&format!(" > {}", out.display()));
        }
        if let Some(err) = &self.stderr {
            line.push_str(&format!(" 2> {}", err.display()));
        }
        line
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Params whose key looks like a flag (`-l`, `--best`) are passed through verbatim;
/// an empty value renders the flag alone.
fn passthrough_flags(params: &BTreeMap<String, String>) -> Vec<String> {
    let mut args_vec = Vec::new();
    for (key, value) in params {
        if key.starts_with('-') {
            args_vec.push(key.clone());
            if !value.is_empty() {
                args_vec.push(value.clone());
            }
        }
    }
    args_vec
}


pub mod bowtie {
    use super::*;

    pub fn arg_generator(task: &Task) -> Result<Invocation, PipelineError> {
        let mut args_vec: Vec<String> = Vec::new();
        args_vec.push("-p".to_string());
        args_vec.push(task.param("threads")?.to_string());
        args_vec.push("-v".to_string());
        args_vec.push(task.param("mismatch")?.to_string());
        if let Some(max_align) = task.params.get("max_align") {
            args_vec.push("-m".to_string());
            args_vec.push(max_align.clone());
        }
        if let Some(report) = task.params.get("report") {
            args_vec.push("-k".to_string());
            args_vec.push(report.clone());
        }
        if let Some(cut) = task.params.get("cut") {
            args_vec.push("-3".to_string());
            args_vec.push(cut.clone());
        }
        args_vec.push("-S".to_string());
        if task.outputs.contains_key("unmapped") {
            args_vec.push("--un".to_string());
            args_vec.push(path_arg(task.output_file("unmapped")?));
        }
        if task.outputs.contains_key("multi") {
            args_vec.push("--max".to_string());
            args_vec.push(path_arg(task.output_file("multi")?));
        }
        args_vec.extend(passthrough_flags(&task.params));
        args_vec.push(task.param("index")?.to_string());

        let reads = task.input_files("fastq")?;
        match reads.as_slice() {
            [single] => args_vec.push(path_arg(single)),
            [mate1, mate2] => {
                args_vec.push("-1".to_string());
                args_vec.push(path_arg(mate1));
                args_vec.push("-2".to_string());
                args_vec.push(path_arg(mate2));
            }
            _ => return Err(PipelineError::InvalidConfig(format!("{}: expected 1 or 2 read files", task.name))),
        }
        args_vec.push(path_arg(task.output_file("sam")?));

        let mut invocation = Invocation::new(BOWTIE_TAG, args_vec);
        invocation.stderr = Some(task.output_file("summary")?.to_path_buf());
        Ok(invocation)
    }
}

pub mod bwa {
    use super::*;
    use crate::config::defs::BwaSubcommand;

    pub fn arg_generator(task: &Task, subcommand: BwaSubcommand) -> Result<Invocation, PipelineError> {
        let mut args_vec: Vec<String> = Vec::new();
        let stdout = match subcommand {
            BwaSubcommand::Aln => {
                args_vec.push("aln".to_string());
                args_vec.push("-t".to_string());
                args_vec.push(task.param("threads")?.to_string());
                args_vec.push("-n".to_string());
                args_vec.push(task.param("mismatch")?.to_string());
                args_vec.extend(passthrough_flags(&task.params));
                args_vec.push(task.param("index")?.to_string());
                args_vec.push(path_arg(task.input_file("fastq")?));
                task.output_file("sai")?
            }
            BwaSubcommand::Samse | BwaSubcommand::Sampe => {
                let expected = if subcommand == BwaSubcommand::Sampe { 2 } else { 1 };
                let sai = task.input_files("sai")?;
                let reads = task.input_files("fastq")?;
                if sai.len() != expected || reads.len() != expected {
                    return Err(PipelineError::InvalidConfig(format!(
                        "{}: expected {} sai and read files",
                        task.name, expected
                    )));
                }
                args_vec.push(if expected == 2 { "sampe" } else { "samse" }.to_string());
                args_vec.push("-n".to_string());
                args_vec.push(task.param("max_align")?.to_string());
                args_vec.push(task.param("index")?.to_string());
                args_vec.extend(sai.iter().map(|p| path_arg(p)));
                args_vec.extend(reads.iter().map(|p| path_arg(p)));
                task.output_file("sam")?
            }
        };
        let mut invocation = Invocation::new(BWA_TAG, args_vec);
        invocation.stdout = Some(stdout.to_path_buf());
        Ok(invocation)
    }
}

pub mod samtools {
    use super::*;
    use crate::config::defs::SamtoolsSubcommand;

    pub fn arg_generator(task: &Task, subcommand: SamtoolsSubcommand) -> Result<Invocation, PipelineError> {
        let mut args_vec: Vec<String> = Vec::new();
        match subcommand {
            SamtoolsSubcommand::View => {
                args_vec.push("view".to_string());
                args_vec.push("-S".to_string());
                if task.params.get("format").map(String::as_str) == Some("bam") {
                    args_vec.push("-b".to_string());
                }
                if task.params.contains_key("header") {
                    args_vec.push("-h".to_string());
                }
                if let Some(chrom_len) = task.params.get("chrom_len") {
                    args_vec.push("-t".to_string());
                    args_vec.push(chrom_len.clone());
                }
                if let Some(mapq) = task.params.get("min_mapq") {
                    args_vec.push("-q".to_string());
                    args_vec.push(mapq.clone());
                }
                if let Some(flags) = task.params.get("exclude_flags") {
                    args_vec.push("-F".to_string());
                    args_vec.push(flags.clone());
                }
                args_vec.extend(passthrough_flags(&task.params));
                args_vec.push(path_arg(task.input_file("sam")?));
                args_vec.push("-o".to_string());
                args_vec.push(path_arg(task.output_file("out")?));
            }
            SamtoolsSubcommand::Fastq => {
                args_vec.push("fastq".to_string());
                args_vec.push("-n".to_string());
                args_vec.push("-f".to_string());
                args_vec.push(task.param("require_flags")?.to_string());
                let outputs = task
                    .outputs
                    .get("fastq")
                    .map(|a| a.paths())
                    .ok_or_else(|| PipelineError::MissingArtifact {
                        task: task.name.clone(),
                        kind: "output",
                        name: "fastq".to_string(),
                    })?;
                match outputs.as_slice() {
                    [single] => {
                        args_vec.push("-0".to_string());
                        args_vec.push(path_arg(single));
                    }
                    [mate1, mate2] => {
                        args_vec.push("-1".to_string());
                        args_vec.push(path_arg(mate1));
                        args_vec.push("-2".to_string());
                        args_vec.push(path_arg(mate2));
                    }
                    _ => return Err(PipelineError::InvalidConfig(format!("{}: expected 1 or 2 FASTQ outputs", task.name))),
                }
                args_vec.push(path_arg(task.input_file("sam")?));
            }
        }
        Ok(Invocation::new(SAMTOOLS_TAG, args_vec))
    }
}

mod awk {
    use super::*;

    pub fn arg_generator(task: &Task) -> Result<Invocation, PipelineError> {
        let args_vec = vec![
            "-f".to_string(),
            task.param("script")?.to_string(),
            path_arg(task.input_file("sam")?),
        ];
        let mut invocation = Invocation::new(AWK_TAG, args_vec);
        invocation.stdout = Some(task.output_file("sam")?.to_path_buf());
        Ok(invocation)
    }
}

mod ln {
    use super::*;

    pub fn arg_generator(task: &Task) -> Result<Invocation, PipelineError> {
        // Relative symlink sources resolve against the link's directory, not the cwd
        let source = std::path::absolute(task.input_file("bam")?)?;
        let args_vec = vec![
            "-sf".to_string(),
            path_arg(&source),
            path_arg(task.output_file("bam")?),
        ];
        Ok(Invocation::new(LN_TAG, args_vec))
    }
}


/// Renders an external task. In-process actions have no command line.
pub fn generate_cli(task: &Task) -> Result<Invocation, PipelineError> {
    let invocation = match &task.command {
        TaskCommand::Bowtie => bowtie::arg_generator(task)?,
        TaskCommand::Bwa(sub) => bwa::arg_generator(task, *sub)?,
        TaskCommand::Samtools(sub) => samtools::arg_generator(task, *sub)?,
        TaskCommand::Awk => awk::arg_generator(task)?,
        TaskCommand::Link => ln::arg_generator(task)?,
        TaskCommand::InProcess(action) => {
            return Err(PipelineError::Other(anyhow!("{} runs in-process ({:?})", task.name, action)));
        }
    };
    Ok(invocation)
}


/// Probes a tool and returns the first line mentioning a version, or the first output line.
pub async fn check_version(tool: &str) -> Result<String, PipelineError> {
    let flag = match tool {
        BOWTIE_TAG | SAMTOOLS_TAG | LN_TAG => "--version",
        AWK_TAG => "-W version",
        _ => "",
    };
    let mut cmd = Command::new(tool);
    if !flag.is_empty() {
        cmd.args(flag.split_whitespace());
    }
    let output = match cmd.output().await {
        Ok(output) => output,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(PipelineError::ToolNotFound(tool.to_string())),
        Err(e) => {
            return Err(PipelineError::ToolExecution {
                tool: tool.to_string(),
                error: e.to_string(),
            })
        }
    };

    // bwa has no version flag and prints its usage, including the version, on stderr
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    let version = text
        .lines()
        .find(|line| line.to_lowercase().contains("version"))
        .or_else(|| text.lines().next())
        .unwrap_or("unknown")
        .trim()
        .to_string();
    debug!("{}: {}", tool, version);
    Ok(version)
}

pub async fn check_versions(tools: Vec<&str>) -> Result<(), PipelineError> {
    for tool in tools {
        check_version(tool).await?;
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defs::{BwaSubcommand, SamtoolsSubcommand};
    use crate::pipelines::workflow::Action;

    fn bowtie_task() -> Task {
        Task::new("bowtie_s1_1", TaskCommand::Bowtie)
            .with_input("fastq", PathBuf::from("s1.fastq"))
            .with_output("sam", PathBuf::from("s1_1.sam"))
            .with_output("unmapped", PathBuf::from("s1_un1.fastq"))
            .with_output("summary", PathBuf::from("s1_1.summary"))
            .with_param("threads", 4)
            .with_param("mismatch", 2)
            .with_param("max_align", 1)
            .with_param("cut", 11)
            .with_param("index", "idx/hg19")
    }

    #[test]
    fn test_bowtie_single_end() {
        let invocation = generate_cli(&bowtie_task()).unwrap();
        assert_eq!(
            invocation.to_shell(),
            "bowtie -p 4 -v 2 -m 1 -3 11 -S --un s1_un1.fastq idx/hg19 s1.fastq s1_1.sam 2> s1_1.summary"
        );
    }

    #[test]
    fn test_bowtie_paired_with_override_flags() {
        let mut task = bowtie_task()
            .with_input("fastq", vec![PathBuf::from("a_1.fq"), PathBuf::from("a_2.fq")]);
        task.params.extend([("--best".to_string(), String::new()), ("threads".to_string(), "8".to_string())]);
        let invocation = generate_cli(&task).unwrap();
        assert_eq!(&invocation.args[..2], &["-p", "8"]);
        assert!(invocation.args.contains(&"--best".to_string()));
        let tail: Vec<&str> = invocation.args.iter().rev().take(5).map(String::as_str).collect();
        assert_eq!(tail, vec!["s1_1.sam", "a_2.fq", "-2", "a_1.fq", "-1"]);
    }

    #[test]
    fn test_bwa_sampe() {
        let task = Task::new("sampe", TaskCommand::Bwa(BwaSubcommand::Sampe))
            .with_input("sai", vec![PathBuf::from("a_1_1.sai"), PathBuf::from("a_1_2.sai")])
            .with_input("fastq", vec![PathBuf::from("a_1.fq"), PathBuf::from("a_2.fq")])
            .with_output("sam", PathBuf::from("a_all.sam"))
            .with_param("max_align", 1)
            .with_param("index", "idx");
        let invocation = generate_cli(&task).unwrap();
        assert_eq!(invocation.to_shell(), "bwa sampe -n 1 idx a_1_1.sai a_1_2.sai a_1.fq a_2.fq > a_all.sam");
    }

    #[test]
    fn test_bwa_samse_rejects_pairs() {
        let task = Task::new("samse", TaskCommand::Bwa(BwaSubcommand::Samse))
            .with_input("sai", vec![PathBuf::from("x.sai"), PathBuf::from("y.sai")])
            .with_input("fastq", vec![PathBuf::from("x.fq"), PathBuf::from("y.fq")])
            .with_output("sam", PathBuf::from("a.sam"))
            .with_param("max_align", 1)
            .with_param("index", "idx");
        assert!(generate_cli(&task).is_err());
    }

    #[test]
    fn test_samtools_bam_conversion() {
        let task = Task::new("sam2bam", TaskCommand::Samtools(SamtoolsSubcommand::View))
            .with_input("sam", PathBuf::from("s_all.sam"))
            .with_output("out", PathBuf::from("s.bam"))
            .with_param("format", "bam")
            .with_param("chrom_len", "hg19.len")
            .with_param("min_mapq", 1);
        let invocation = generate_cli(&task).unwrap();
        assert_eq!(invocation.to_shell(), "samtools view -S -b -t hg19.len -q 1 s_all.sam -o s.bam");
    }

    #[test]
    fn test_samtools_fastq_pairs() {
        let task = Task::new("unmapped", TaskCommand::Samtools(SamtoolsSubcommand::Fastq))
            .with_input("sam", PathBuf::from("s_1_raw.sam"))
            .with_output("fastq", vec![PathBuf::from("s_un1_1.fastq"), PathBuf::from("s_un1_2.fastq")])
            .with_param("require_flags", 12);
        let invocation = generate_cli(&task).unwrap();
        assert_eq!(
            invocation.to_shell(),
            "samtools fastq -n -f 12 -1 s_un1_1.fastq -2 s_un1_2.fastq s_1_raw.sam"
        );
    }

    #[test]
    fn test_in_process_has_no_cli() {
        let task = Task::new("merge", TaskCommand::InProcess(Action::MergeSam));
        assert!(generate_cli(&task).is_err());
    }

    #[test]
    fn test_missing_param_is_reported() {
        let mut task = bowtie_task();
        task.params.remove("index");
        match generate_cli(&task) {
            Err(PipelineError::MissingArtifact { kind, name, .. }) => {
                assert_eq!(kind, "param");
                assert_eq!(name, "index");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
