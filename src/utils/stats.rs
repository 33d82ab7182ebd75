/// Read-count statistics scraped from aligner logs.
use std::fs;
use std::path::Path;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

lazy_static! {
    static ref PROCESSED_RE: Regex = Regex::new(r"# reads processed: (\d+)").unwrap();
    static ref ALIGNED_RE: Regex = Regex::new(r"# reads with at least one reported alignment: (\d+)").unwrap();
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SummaryError {
    #[error("no '{0}' line found")]
    MissingField(&'static str),
    #[error("'{0}' count is not a valid integer")]
    BadNumber(&'static str),
    #[error("zero reads processed, mappable rate is undefined")]
    NoReads,
    #[error("cannot read summary: {0}")]
    Unreadable(String),
}

/// Counts from one bowtie run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlignmentSummary {
    pub total_reads: u64,
    pub mappable_reads: u64,
    /// `mappable_reads / total_reads`, a fraction rather than a percentage.
    pub mappable_rate: f64,
}

fn capture_count(re: &Regex, text: &str, field: &'static str) -> Result<u64, SummaryError> {
    let caps = re.captures(text).ok_or(SummaryError::MissingField(field))?;
    caps[1].parse().map_err(|_| SummaryError::BadNumber(field))
}

/// Parses the run summary bowtie prints on stderr.
pub fn parse_alignment_summary(text: &str) -> Result<AlignmentSummary, SummaryError> {
    let total_reads = capture_count(&PROCESSED_RE, text, "reads processed")?;
    let mappable_reads = capture_count(&ALIGNED_RE, text, "reads with at least one reported alignment")?;
    if total_reads == 0 {
        return Err(SummaryError::NoReads);
    }
    Ok(AlignmentSummary {
        total_reads,
        mappable_reads,
        mappable_rate: mappable_reads as f64 / total_reads as f64,
    })
}

pub fn read_alignment_summary(path: &Path) -> Result<AlignmentSummary, SummaryError> {
    let text = fs::read_to_string(path).map_err(|e| SummaryError::Unreadable(e.to_string()))?;
    parse_alignment_summary(&text)
}
