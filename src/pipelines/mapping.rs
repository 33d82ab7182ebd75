//! Read mapping: bowtie or bwa, single pass or three-step trim-and-retry,
//! followed by autosome filtering, statistics and BAM conversion.
//!
//! Three-step mapping aligns the full read set once, then re-aligns only the
//! reads left unmapped with a longer 3' trim, twice. The three partial SAMs are
//! merged into `<target>_all.sam`, the same artifact a single pass produces.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use crate::config::defs::{
    BwaSubcommand, Mapper, PipelineError, SamtoolsSubcommand, SeqType, ALL_SAM_SUFFIX,
    ALL_SUMMARY_SUFFIX, AUTOSOME_JSON_SUFFIX, AUTOSOME_SAM_SUFFIX, BAM_SUFFIX, BOWTIE_TAG, BWA_TAG,
    MAPPING_JSON_SUFFIX, MAX_ALIGN, MIN_MAPQ, SAMTOOLS_TAG, THREE_STEP_SEED_LENGTH,
};
use crate::config::run::{RunConfiguration, Sample};
use crate::pipelines::workflow::{Action, Artifact, Command, Task, Workflow};
use crate::utils::fastq::count_fastq_records;
use crate::utils::file::{mate_paths, target_path};
use crate::utils::report::StatArtifact;
use crate::utils::sambam::sam_alignment_count;
use crate::utils::stats::read_alignment_summary;


/// 3'-trim lengths of the three passes, in execution order.
///
/// `[L - 28, (L - 28) / 2, 0]` reversed, so the first pass aligns untrimmed reads.
pub fn three_step_cuts(read_length: i64) -> [i64; 3] {
    let cut0 = read_length - THREE_STEP_SEED_LENGTH;
    let cut1 = cut0.div_euclid(2);
    let mut steps = [cut0, cut1, 0];
    steps.reverse();
    steps
}

/// Cuts to use when three-step mapping applies: the flag is set and the
/// middle trim is positive. `None` means a single pass.
pub fn three_step_plan(config: &RunConfiguration) -> Option<[i64; 3]> {
    if !config.three_step {
        return None;
    }
    let cuts = three_step_cuts(config.read_length);
    if cuts[1] > 0 {
        Some(cuts)
    } else {
        info!(
            "Read length {} too short for three-step mapping; using a single pass",
            config.read_length
        );
        None
    }
}

/// Appends the mapping stage for every sample.
///
/// Pre-aligned BAM input is only linked into place; BED input needs no mapping.
pub fn reads_mapping(workflow: &mut Workflow, config: &RunConfiguration) {
    match config.seq_type {
        SeqType::Bed => {
            info!("BED input: skipping read mapping");
            return;
        }
        SeqType::Bam => {
            link_bam(workflow, config);
            return;
        }
        SeqType::Se | SeqType::Pe => {}
    }

    let plan = three_step_plan(config);
    let mut summaries: Vec<(String, Vec<PathBuf>)> = Vec::new();
    for sample in &config.samples {
        match (config.mapper, plan) {
            (Mapper::Bowtie, Some(cuts)) => summaries.push((sample.name.clone(), bowtie_three_step(workflow, config, sample, cuts))),
            (Mapper::Bowtie, None) => summaries.push((sample.name.clone(), bowtie_one_step(workflow, config, sample))),
            (Mapper::Bwa, Some(cuts)) => bwa_three_step(workflow, config, sample, cuts),
            (Mapper::Bwa, None) => bwa_one_step(workflow, config, sample),
        }
    }

    autosome_filter(workflow, config);
    autosome_ratio(workflow, config);
    sam_to_bam(workflow, config);
    if config.mapper == Mapper::Bowtie {
        mapping_summary(workflow, config, summaries);
    }
}


fn raw_reads(sample: &Sample) -> Artifact {
    match sample.raw.as_slice() {
        [single] => Artifact::File(single.clone()),
        mates => Artifact::Files(mates.to_vec()),
    }
}

/// Aligner task shared by mapping and contamination screening.
pub(crate) fn bowtie_task(
    name: String,
    config: &RunConfiguration,
    index: &Path,
    reads: Artifact,
    sam: PathBuf,
    summary: PathBuf,
) -> Task {
    Task::new(name, Command::Bowtie)
        .with_input("fastq", reads)
        .with_output("sam", sam)
        .with_output("summary", summary)
        .with_param("threads", config.threads)
        .with_param("mismatch", config.mismatch)
        .with_param("index", index.display())
}

/// One pass straight to `<target>_all.sam`. Returns the summary log path.
fn bowtie_one_step(workflow: &mut Workflow, config: &RunConfiguration, sample: &Sample) -> Vec<PathBuf> {
    let summary = target_path(&sample.target, ALL_SUMMARY_SUFFIX);
    let task = bowtie_task(
        format!("bowtie_{}", sample.name),
        config,
        &config.genome_index,
        raw_reads(sample),
        target_path(&sample.target, ALL_SAM_SUFFIX),
        summary.clone(),
    )
    .with_param("max_align", MAX_ALIGN);
    workflow.attach(task).params.extend(config.tool_options(BOWTIE_TAG));
    vec![summary]
}

/// Three chained passes plus the merge. Step `i` consumes `<target>_un{i-1}.fastq`
/// written by step `i-1` (its mates `_1`/`_2` for paired input); the merge
/// consumes `<target>_{1,2,3}.sam`. Returns the summary log paths in step order.
fn bowtie_three_step(
    workflow: &mut Workflow,
    config: &RunConfiguration,
    sample: &Sample,
    cuts: [i64; 3],
) -> Vec<PathBuf> {
    let target = &sample.target;
    let mut reads = raw_reads(sample);
    let mut sams = Vec::with_capacity(3);
    let mut summaries = Vec::with_capacity(3);

    for (i, cut) in cuts.iter().enumerate() {
        let step = i + 1;
        let sam = target_path(target, &format!("_{}.sam", step));
        let unmapped = target_path(target, &format!("_un{}.fastq", step));
        let summary = target_path(target, &format!("_{}.summary", step));

        let mut task = bowtie_task(
            format!("bowtie_{}_step{}", sample.name, step),
            config,
            &config.genome_index,
            reads,
            sam.clone(),
            summary.clone(),
        )
        .with_output("unmapped", unmapped.clone())
        .with_output("multi", target_path(target, &format!("_max{}.fastq", step)))
        .with_param("max_align", MAX_ALIGN)
        .with_param("cut", cut);

        reads = if config.paired() {
            // bowtie splits a paired --un path into per-mate files
            let mates = mate_paths(&unmapped);
            task = task.with_output("unmapped_mates", mates.clone());
            Artifact::Files(mates)
        } else {
            Artifact::File(unmapped)
        };

        workflow.attach(task).params.extend(config.tool_options(BOWTIE_TAG));
        sams.push(sam);
        summaries.push(summary);
    }

    attach_merge(workflow, sample, sams);
    summaries
}

fn attach_merge(workflow: &mut Workflow, sample: &Sample, sams: Vec<PathBuf>) {
    workflow.attach(
        Task::new(format!("merge_sam_{}", sample.name), Command::InProcess(Action::MergeSam))
            .with_input("sams", sams)
            .with_output("sam", target_path(&sample.target, ALL_SAM_SUFFIX)),
    );
}


/// `bwa aln` for each read file, then `samse`/`sampe` into `sam`.
fn bwa_align(
    workflow: &mut Workflow,
    config: &RunConfiguration,
    sample: &Sample,
    label: &str,
    reads: &[PathBuf],
    sam: PathBuf,
) {
    let sais: Vec<PathBuf> = if reads.len() == 1 {
        vec![target_path(&sample.target, &format!("_{}.sai", label))]
    } else {
        (1..=reads.len())
            .map(|mate| target_path(&sample.target, &format!("_{}_{}.sai", label, mate)))
            .collect()
    };

    for (mate, (fastq, sai)) in reads.iter().zip(&sais).enumerate() {
        let task = Task::new(format!("bwa_aln_{}_{}_{}", sample.name, label, mate + 1), Command::Bwa(BwaSubcommand::Aln))
            .with_input("fastq", fastq.clone())
            .with_output("sai", sai.clone())
            .with_param("threads", config.threads)
            .with_param("mismatch", config.mismatch)
            .with_param("index", config.genome_index.display());
        workflow.attach(task).params.extend(config.tool_options(BWA_TAG));
    }

    let subcommand = if reads.len() == 2 { BwaSubcommand::Sampe } else { BwaSubcommand::Samse };
    workflow.attach(
        Task::new(format!("bwa_sam_{}_{}", sample.name, label), Command::Bwa(subcommand))
            .with_input("sai", sais)
            .with_input("fastq", reads.to_vec())
            .with_output("sam", sam)
            .with_param("max_align", MAX_ALIGN)
            .with_param("index", config.genome_index.display()),
    );
}

fn bwa_one_step(workflow: &mut Workflow, config: &RunConfiguration, sample: &Sample) {
    bwa_align(workflow, config, sample, "all", &sample.raw, target_path(&sample.target, ALL_SAM_SUFFIX));
}

/// bwa cannot trim on its own, so each pass trims its input in-process first.
/// Reads unmapped by pass `i-1` were already trimmed by `cuts[i-1]`; pass `i`
/// only removes the difference.
fn bwa_three_step(workflow: &mut Workflow, config: &RunConfiguration, sample: &Sample, cuts: [i64; 3]) {
    let target = &sample.target;
    let paired = config.paired();
    let mut reads: Vec<PathBuf> = sample.raw.clone();
    let mut previous_cut = 0i64;
    let mut sams = Vec::with_capacity(3);

    for (i, &cut) in cuts.iter().enumerate() {
        let step = i + 1;
        let trim = cut - previous_cut;
        previous_cut = cut;

        if trim > 0 {
            let trimmed: Vec<PathBuf> = if paired {
                mate_paths(&target_path(target, &format!("_trim{}.fastq", step)))
            } else {
                vec![target_path(target, &format!("_trim{}.fastq", step))]
            };
            workflow.attach(
                Task::new(format!("trim_{}_step{}", sample.name, step), Command::InProcess(Action::TrimReads))
                    .with_input("fastq", reads.clone())
                    .with_output("fastq", trimmed.clone())
                    .with_param("trim", trim)
                    .with_param("cut", cut),
            );
            reads = trimmed;
        }

        let raw_sam = target_path(target, &format!("_{}_raw.sam", step));
        bwa_align(workflow, config, sample, &step.to_string(), &reads, raw_sam.clone());

        let sam = target_path(target, &format!("_{}.sam", step));
        workflow.attach(
            Task::new(format!("mapped_{}_step{}", sample.name, step), Command::Samtools(SamtoolsSubcommand::View))
                .with_input("sam", raw_sam.clone())
                .with_output("out", sam.clone())
                .with_param("header", "true")
                .with_param("exclude_flags", 4),
        );

        let unmapped = target_path(target, &format!("_un{}.fastq", step));
        let unmapped_reads = if paired { mate_paths(&unmapped) } else { vec![unmapped] };
        workflow.attach(
            Task::new(format!("unmapped_{}_step{}", sample.name, step), Command::Samtools(SamtoolsSubcommand::Fastq))
                .with_input("sam", raw_sam)
                .with_output("fastq", unmapped_reads.clone())
                .with_param("require_flags", if paired { 12 } else { 4 }),
        );

        reads = unmapped_reads;
        sams.push(sam);
    }

    attach_merge(workflow, sample, sams);
}


/// Keeps the header and autosomal uniquely-mapped reads; the script depends on the mapper's SAM tags.
fn autosome_filter(workflow: &mut Workflow, config: &RunConfiguration) {
    let script = config.script_dir.join(config.mapper.filter_script());
    for sample in &config.samples {
        workflow.attach(
            Task::new(format!("autosome_{}", sample.name), Command::Awk)
                .with_input("sam", target_path(&sample.target, ALL_SAM_SUFFIX))
                .with_output("sam", target_path(&sample.target, AUTOSOME_SAM_SUFFIX))
                .with_param("script", script.display()),
        );
    }
}

pub(crate) fn sample_key(sample: &str, slot: &str) -> String {
    format!("{}.{}", sample, slot)
}

fn autosome_ratio(workflow: &mut Workflow, config: &RunConfiguration) {
    let mut task = Task::new(
        "autosome_ratio",
        Command::InProcess(Action::AutosomeRatio {
            samples: config.samples.iter().map(|s| s.name.clone()).collect(),
        }),
    )
    .with_output("json", config.prefix_path(AUTOSOME_JSON_SUFFIX))
    .with_param("mapper", config.mapper);
    for sample in &config.samples {
        task = task
            .with_input(&sample_key(&sample.name, "autosome"), target_path(&sample.target, AUTOSOME_SAM_SUFFIX))
            .with_input(&sample_key(&sample.name, "raw"), sample.mate1().to_path_buf());
    }
    workflow.attach(task);
}

fn sam_to_bam(workflow: &mut Workflow, config: &RunConfiguration) {
    for sample in &config.samples {
        let task = Task::new(format!("sam2bam_{}", sample.name), Command::Samtools(SamtoolsSubcommand::View))
            .with_input("sam", target_path(&sample.target, ALL_SAM_SUFFIX))
            .with_output("out", target_path(&sample.target, BAM_SUFFIX))
            .with_param("format", "bam")
            .with_param("chrom_len", workflow.chrom_len.display())
            .with_param("min_mapq", MIN_MAPQ);
        workflow.attach(task).params.extend(config.tool_options(SAMTOOLS_TAG));
    }
}

/// Pre-aligned input is taken as is: linked, not filtered or converted.
fn link_bam(workflow: &mut Workflow, config: &RunConfiguration) {
    for sample in &config.samples {
        workflow.attach(
            Task::new(format!("link_bam_{}", sample.name), Command::Link)
                .with_input("bam", sample.mate1().to_path_buf())
                .with_output("bam", target_path(&sample.target, BAM_SUFFIX)),
        );
    }
}

fn mapping_summary(workflow: &mut Workflow, config: &RunConfiguration, summaries: Vec<(String, Vec<PathBuf>)>) {
    let mut task = Task::new(
        "mapping_summary",
        Command::InProcess(Action::MappingSummary {
            samples: summaries.iter().map(|(name, _)| name.clone()).collect(),
        }),
    )
    .with_output("json", config.prefix_path(MAPPING_JSON_SUFFIX));
    for (name, logs) in summaries {
        task = task.with_input(&name, logs);
    }
    workflow.attach(task);
}


/// Autosome unique mapped reads over raw reads for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutosomeRatio {
    pub ratio: f64,
    pub map: String,
    pub total: String,
}

/// Counts `<target>_autosome.sam` alignments and raw reads, writes the ratio JSON.
pub fn run_autosome_ratio(task: &Task, samples: &[String]) -> Result<BTreeMap<String, AutosomeRatio>, PipelineError> {
    let mut stat = BTreeMap::new();
    for sample in samples {
        let mapped = sam_alignment_count(task.input_file(&sample_key(sample, "autosome"))?)?;
        // Reads are fragments: paired input counts mate 1 only
        let raw = task.input_file(&sample_key(sample, "raw"))?;
        let total = count_fastq_records(raw)?;
        if total == 0 {
            return Err(PipelineError::NoReads {
                task: task.name.clone(),
                path: raw.display().to_string(),
            });
        }
        debug!("{}: {} autosome unique reads of {}", sample, mapped, total);
        stat.insert(
            sample.clone(),
            AutosomeRatio {
                ratio: mapped as f64 / total as f64,
                map: mapped.to_string(),
                total: total.to_string(),
            },
        );
    }
    StatArtifact::for_task(task, &stat).write(task.output_file("json")?)?;
    Ok(stat)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingStat {
    pub total: u64,
    pub mapped: u64,
    pub rate: f64,
}

/// Total reads from the first pass, mapped reads summed over all passes.
pub fn run_mapping_summary(task: &Task, samples: &[String]) -> Result<BTreeMap<String, MappingStat>, PipelineError> {
    let mut stat = BTreeMap::new();
    for sample in samples {
        let mut total = None;
        let mut mapped = 0u64;
        for path in task.input_files(sample)? {
            let summary = read_alignment_summary(path).map_err(|source| PipelineError::Summary {
                path: path.display().to_string(),
                source,
            })?;
            total.get_or_insert(summary.total_reads);
            mapped += summary.mappable_reads;
        }
        let total = total.ok_or_else(|| PipelineError::MissingArtifact {
            task: task.name.clone(),
            kind: "input",
            name: sample.clone(),
        })?;
        stat.insert(
            sample.clone(),
            MappingStat {
                total,
                mapped,
                rate: mapped as f64 / total as f64,
            },
        );
    }
    StatArtifact::for_task(task, &stat).write(task.output_file("json")?)?;
    Ok(stat)
}
