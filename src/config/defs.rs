use std::fmt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use crate::utils::stats::SummaryError;
use crate::pipelines::contamination::ContaminationDetected;

// External software
pub const BOWTIE_TAG: &str = "bowtie";
pub const BWA_TAG: &str = "bwa";
pub const SAMTOOLS_TAG: &str = "samtools";
pub const AWK_TAG: &str = "awk";
pub const LN_TAG: &str = "ln";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamtoolsSubcommand {
    View,
    Fastq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BwaSubcommand {
    Aln,
    Samse,
    Sampe,
}

// Per-target artifact suffixes. Downstream stages depend on these names.
pub const ALL_SAM_SUFFIX: &str = "_all.sam";
pub const ALL_SUMMARY_SUFFIX: &str = "_all.summary";
pub const AUTOSOME_SAM_SUFFIX: &str = "_autosome.sam";
pub const DOWNSAMPLE_SUFFIX: &str = "_100k.fastq";
pub const BAM_SUFFIX: &str = ".bam";

// Run-level artifacts, appended to the output prefix
pub const CONTAM_JSON_SUFFIX: &str = "_contam.json";
pub const AUTOSOME_JSON_SUFFIX: &str = "_autosome_ratio.json";
pub const MAPPING_JSON_SUFFIX: &str = "_mapping_summary.json";

// AWK filters, one per mapper
pub const BOWTIE_FILTER_SCRIPT: &str = "filter_bowtie.awk";
pub const BWA_FILTER_SCRIPT: &str = "filter_bwa.awk";


// Static Parameters

/// Reads reported with more than this many hits are suppressed. Defines "uniquely mappable".
pub const MAX_ALIGN: usize = 1;
pub const MIN_MAPQ: u8 = 1;
/// Length the first three-step pass trims reads down to.
pub const THREE_STEP_SEED_LENGTH: i64 = 28;
pub const DEFAULT_DOWNSAMPLE_READS: usize = 100_000;
pub const DEFAULT_MISMATCH: u8 = 2;


/// Sequencing layout of the run's inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeqType {
    Se,
    Pe,
    Bam,
    Bed,
}

impl SeqType {
    /// Number of raw files each sample must carry.
    pub fn raw_files_per_sample(&self) -> usize {
        match self {
            SeqType::Pe => 2,
            _ => 1,
        }
    }

    pub fn is_fastq(&self) -> bool {
        matches!(self, SeqType::Se | SeqType::Pe)
    }
}

impl fmt::Display for SeqType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqType::Se => write!(f, "se"),
            SeqType::Pe => write!(f, "pe"),
            SeqType::Bam => write!(f, "bam"),
            SeqType::Bed => write!(f, "bed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mapper {
    #[default]
    Bowtie,
    Bwa,
}

impl Mapper {
    pub fn tag(&self) -> &'static str {
        match self {
            Mapper::Bowtie => BOWTIE_TAG,
            Mapper::Bwa => BWA_TAG,
        }
    }

    /// Autosome filter script for this mapper's SAM dialect.
    pub fn filter_script(&self) -> &'static str {
        match self {
            Mapper::Bowtie => BOWTIE_FILTER_SCRIPT,
            Mapper::Bwa => BWA_FILTER_SCRIPT,
        }
    }
}

impl fmt::Display for Mapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}


#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{tool} failed: {error}")]
    ToolExecution { tool: String, error: String },

    #[error("{0} not found on PATH")]
    ToolNotFound(String),

    #[error("Task {task} is missing {kind} '{name}'")]
    MissingArtifact { task: String, kind: &'static str, name: String },

    #[error("Task {task}: {path} holds no reads, ratio is undefined")]
    NoReads { task: String, path: String },

    #[error("Alignment summary {path}: {source}")]
    Summary { path: String, source: SummaryError },

    #[error(transparent)]
    Contaminated(#[from] ContaminationDetected),

    #[error("IO error: {0}")]
    IOError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        PipelineError::IOError(e.to_string())
    }
}
