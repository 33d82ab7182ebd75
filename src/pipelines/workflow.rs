//! Ordered task list describing a pipeline run.
//!
//! Builders append tasks in dependency order; nothing here validates that an
//! input was produced upstream. Execution order is append order.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::config::defs::{BwaSubcommand, PipelineError, SamtoolsSubcommand, AWK_TAG, BOWTIE_TAG, BWA_TAG, LN_TAG, SAMTOOLS_TAG};
use crate::config::run::RunConfiguration;


/// A file, or an ordered group of files (mates, merge inputs), bound to a task slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Artifact {
    File(PathBuf),
    Files(Vec<PathBuf>),
}

impl Artifact {
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            Artifact::File(path) => vec![path.as_path()],
            Artifact::Files(paths) => paths.iter().map(PathBuf::as_path).collect(),
        }
    }
}

impl From<PathBuf> for Artifact {
    fn from(path: PathBuf) -> Self {
        Artifact::File(path)
    }
}

impl From<Vec<PathBuf>> for Artifact {
    fn from(paths: Vec<PathBuf>) -> Self {
        Artifact::Files(paths)
    }
}


/// Work done inside this process rather than by an external tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Header of the first SAM plus bodies of all SAMs, in order.
    MergeSam,
    /// Drops `trim` bases from the 3' end of every read.
    TrimReads,
    /// Keeps the first `reads` records.
    Downsample,
    /// Compares mappable rates of each sample against every screened species.
    ContaminationGate {
        declared: String,
        samples: Vec<String>,
        species: Vec<String>,
    },
    /// Autosome unique mapped reads over raw reads, per sample.
    AutosomeRatio { samples: Vec<String> },
    /// Reads processed and aligned per sample, summed over mapping passes.
    MappingSummary { samples: Vec<String> },
}

/// What a task runs. Argument vectors are only built by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Bowtie,
    Bwa(BwaSubcommand),
    Samtools(SamtoolsSubcommand),
    Awk,
    Link,
    InProcess(Action),
}

impl Command {
    /// Logical tool identifier.
    pub fn tool(&self) -> &'static str {
        match self {
            Command::Bowtie => BOWTIE_TAG,
            Command::Bwa(_) => BWA_TAG,
            Command::Samtools(_) => SAMTOOLS_TAG,
            Command::Awk => AWK_TAG,
            Command::Link => LN_TAG,
            Command::InProcess(_) => "internal",
        }
    }
}


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,
    pub command: Command,
    pub inputs: BTreeMap<String, Artifact>,
    pub outputs: BTreeMap<String, Artifact>,
    pub params: BTreeMap<String, String>,
}

impl Task {
    pub fn new(name: impl Into<String>, command: Command) -> Self {
        Task {
            name: name.into(),
            command,
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, key: &str, artifact: impl Into<Artifact>) -> Self {
        self.inputs.insert(key.to_string(), artifact.into());
        self
    }

    pub fn with_output(mut self, key: &str, artifact: impl Into<Artifact>) -> Self {
        self.outputs.insert(key.to_string(), artifact.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn tool(&self) -> &'static str {
        self.command.tool()
    }

    pub fn input_file(&self, key: &str) -> Result<&Path, PipelineError> {
        single(self.inputs.get(key)).ok_or_else(|| self.missing("input", key))
    }

    pub fn input_files(&self, key: &str) -> Result<Vec<&Path>, PipelineError> {
        self.inputs.get(key).map(Artifact::paths).ok_or_else(|| self.missing("input", key))
    }

    pub fn output_file(&self, key: &str) -> Result<&Path, PipelineError> {
        single(self.outputs.get(key)).ok_or_else(|| self.missing("output", key))
    }

    pub fn param(&self, key: &str) -> Result<&str, PipelineError> {
        self.params.get(key).map(String::as_str).ok_or_else(|| self.missing("param", key))
    }

    fn missing(&self, kind: &'static str, key: &str) -> PipelineError {
        PipelineError::MissingArtifact {
            task: self.name.clone(),
            kind,
            name: key.to_string(),
        }
    }
}

fn single(artifact: Option<&Artifact>) -> Option<&Path> {
    match artifact? {
        Artifact::File(path) => Some(path.as_path()),
        Artifact::Files(paths) if paths.len() == 1 => Some(paths[0].as_path()),
        Artifact::Files(_) => None,
    }
}


#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workflow {
    pub tasks: Vec<Task>,
    pub threads: usize,
    pub genome_index: PathBuf,
    pub chrom_len: PathBuf,
    /// Files that exist before the run starts (raw reads, pre-aligned BAMs).
    pub external_inputs: Vec<PathBuf>,
}

impl Workflow {
    pub fn new(threads: usize, genome_index: impl Into<PathBuf>, chrom_len: impl Into<PathBuf>) -> Self {
        Workflow {
            tasks: Vec::new(),
            threads,
            genome_index: genome_index.into(),
            chrom_len: chrom_len.into(),
            external_inputs: Vec::new(),
        }
    }

    pub fn from_config(config: &RunConfiguration) -> Self {
        let mut workflow = Workflow::new(config.threads, &config.genome_index, &config.chrom_len);
        workflow.external_inputs = config
            .samples
            .iter()
            .flat_map(|sample| sample.raw.iter().cloned())
            .collect();
        workflow
    }

    /// Appends `task` and hands it back so callers can layer on extra params.
    ///
    /// No validation or deduplication: two tasks may write the same output
    /// path, in which case the later one wins at execution time.
    pub fn attach(&mut self, task: Task) -> &mut Task {
        self.tasks.push(task);
        let last = self.tasks.len() - 1;
        &mut self.tasks[last]
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Inputs that no earlier task produces and that are not external run inputs,
    /// as `(task index, input name, path)`. Never invoked by the builders.
    pub fn unproduced_inputs(&self) -> Vec<(usize, String, PathBuf)> {
        let mut produced: HashSet<&Path> = self.external_inputs.iter().map(PathBuf::as_path).collect();
        let mut missing = Vec::new();
        for (i, task) in self.tasks.iter().enumerate() {
            for (name, artifact) in &task.inputs {
                for path in artifact.paths() {
                    if !produced.contains(path) {
                        missing.push((i, name.clone(), path.to_path_buf()));
                    }
                }
            }
            for artifact in task.outputs.values() {
                produced.extend(artifact.paths());
            }
        }
        missing
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_preserves_call_order() {
        let mut workflow = Workflow::new(1, "idx", "chrom.len");
        for i in 0..5 {
            workflow.attach(Task::new(format!("task{}", i), Command::Awk));
        }
        // same name twice is kept, not deduplicated
        workflow.attach(Task::new("task0", Command::Awk));
        let names: Vec<&str> = workflow.tasks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["task0", "task1", "task2", "task3", "task4", "task0"]);
    }

    #[test]
    fn test_attach_returns_stored_task() {
        let mut workflow = Workflow::new(1, "idx", "chrom.len");
        workflow
            .attach(Task::new("bowtie", Command::Bowtie).with_param("threads", 1))
            .params
            .extend([("threads".to_string(), "8".to_string())]);
        assert_eq!(workflow.tasks[0].param("threads").unwrap(), "8");
    }

    #[test]
    fn test_unproduced_inputs() {
        let mut workflow = Workflow::new(1, "idx", "chrom.len");
        workflow.external_inputs.push(PathBuf::from("raw.fastq"));
        workflow.attach(
            Task::new("a", Command::Bowtie)
                .with_input("fastq", PathBuf::from("raw.fastq"))
                .with_output("sam", PathBuf::from("a.sam")),
        );
        workflow.attach(
            Task::new("b", Command::InProcess(Action::MergeSam))
                .with_input("sams", vec![PathBuf::from("a.sam"), PathBuf::from("ghost.sam")])
                .with_output("sam", PathBuf::from("all.sam")),
        );
        let missing = workflow.unproduced_inputs();
        assert_eq!(missing, vec![(1, "sams".to_string(), PathBuf::from("ghost.sam"))]);
    }

    #[test]
    fn test_single_file_accessors() {
        let task = Task::new("t", Command::Awk)
            .with_input("pair", vec![PathBuf::from("a_1.fq"), PathBuf::from("a_2.fq")])
            .with_input("one", vec![PathBuf::from("x.fq")]);
        assert!(task.input_file("pair").is_err());
        assert_eq!(task.input_file("one").unwrap(), Path::new("x.fq"));
        assert_eq!(task.input_files("pair").unwrap().len(), 2);
        assert!(matches!(task.param("threads"), Err(PipelineError::MissingArtifact { .. })));
    }
}
