use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use crate::cli::Arguments;
use crate::config::defs::{Mapper, PipelineError, SeqType, DEFAULT_DOWNSAMPLE_READS, DEFAULT_MISMATCH};


/// One sample or replicate: its raw input file(s) and the basename every derived artifact hangs off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    pub raw: Vec<PathBuf>,
    pub target: PathBuf,
}

impl Sample {
    pub fn new(name: &str, raw: Vec<PathBuf>, target: impl Into<PathBuf>) -> Self {
        Sample {
            name: name.to_string(),
            raw,
            target: target.into(),
        }
    }

    /// First (or only) mate.
    pub fn mate1(&self) -> &Path {
        &self.raw[0]
    }
}


/// Read-only description of a single pipeline invocation.
///
/// Built once from the JSON run file plus command line overrides, validated,
/// then shared by reference with every builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfiguration {
    /// Path prefix for run-level artifacts (JSON statistics).
    pub prefix: String,
    pub seq_type: SeqType,
    pub samples: Vec<Sample>,
    #[serde(default)]
    pub mapper: Mapper,
    /// Per-tool parameter overrides, keyed by tool tag.
    #[serde(default)]
    pub tool_options: BTreeMap<String, BTreeMap<String, String>>,
    pub genome_index: PathBuf,
    pub chrom_len: PathBuf,
    /// Declared species of the library; must be a key of `contaminants`.
    pub species: String,
    /// Bowtie index per species screened by the contamination gate.
    #[serde(default)]
    pub contaminants: BTreeMap<String, PathBuf>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    #[serde(default = "default_mismatch")]
    pub mismatch: u8,
    #[serde(default)]
    pub read_length: i64,
    #[serde(default)]
    pub three_step: bool,
    #[serde(default = "default_downsample_reads")]
    pub downsample_reads: usize,
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,
}

fn default_threads() -> usize {
    num_cpus::get()
}

fn default_mismatch() -> u8 {
    DEFAULT_MISMATCH
}

fn default_downsample_reads() -> usize {
    DEFAULT_DOWNSAMPLE_READS
}

fn default_script_dir() -> PathBuf {
    PathBuf::from("resources")
}

impl RunConfiguration {
    pub fn new(
        prefix: &str,
        seq_type: SeqType,
        samples: Vec<Sample>,
        genome_index: impl Into<PathBuf>,
        chrom_len: impl Into<PathBuf>,
        species: &str,
    ) -> Self {
        RunConfiguration {
            prefix: prefix.to_string(),
            seq_type,
            samples,
            mapper: Mapper::default(),
            tool_options: BTreeMap::new(),
            genome_index: genome_index.into(),
            chrom_len: chrom_len.into(),
            species: species.to_string(),
            contaminants: BTreeMap::new(),
            threads: 1,
            mismatch: DEFAULT_MISMATCH,
            read_length: 0,
            three_step: false,
            downsample_reads: DEFAULT_DOWNSAMPLE_READS,
            script_dir: default_script_dir(),
        }
    }

    /// Loads the JSON run file.
    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let file = File::open(path)
            .map_err(|e| PipelineError::InvalidConfig(format!("Cannot open {}: {}", path.display(), e)))?;
        let config: RunConfiguration = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| PipelineError::InvalidConfig(format!("Cannot parse {}: {}", path.display(), e)))?;
        debug!("Loaded run configuration with {} samples from {}", config.samples.len(), path.display());
        Ok(config)
    }

    /// Applies command line overrides. Only called before the configuration is frozen.
    pub fn apply_overrides(&mut self, args: &Arguments) {
        if let Some(threads) = args.threads {
            self.threads = threads;
        }
        if args.three_step {
            self.three_step = true;
        }
        if let Some(prefix) = &args.prefix {
            self.prefix = prefix.clone();
        }
        if let Some(dir) = &args.script_dir {
            self.script_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.samples.is_empty() {
            return Err(PipelineError::InvalidConfig("No samples configured".to_string()));
        }
        if self.threads == 0 {
            return Err(PipelineError::InvalidConfig("threads must be positive".to_string()));
        }
        let expected = self.seq_type.raw_files_per_sample();
        let mut names = HashSet::new();
        for sample in &self.samples {
            // Names key the per-sample task inputs and JSON statistics
            if !names.insert(sample.name.as_str()) {
                return Err(PipelineError::InvalidConfig(format!("Duplicate sample name {}", sample.name)));
            }
            if sample.raw.len() != expected {
                return Err(PipelineError::InvalidConfig(format!(
                    "Sample {} has {} raw files; {} input needs {}",
                    sample.name,
                    sample.raw.len(),
                    self.seq_type,
                    expected
                )));
            }
        }
        if self.contaminants.is_empty() {
            warn!("No contaminant genomes configured; library contamination check will be skipped");
        } else if !self.contaminants.contains_key(&self.species) {
            return Err(PipelineError::InvalidConfig(format!(
                "Declared species {} has no index among contaminant genomes",
                self.species
            )));
        }
        Ok(())
    }

    /// Overrides for `tool`, empty when none are configured.
    pub fn tool_options(&self, tool: &str) -> BTreeMap<String, String> {
        self.tool_options.get(tool).cloned().unwrap_or_default()
    }

    /// Run-level artifact path, e.g. `<prefix>_contam.json`.
    pub fn prefix_path(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}{}", self.prefix, suffix))
    }

    pub fn paired(&self) -> bool {
        self.seq_type == SeqType::Pe
    }
}
