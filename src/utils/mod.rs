pub mod command;
pub mod fastq;
pub mod file;
pub mod report;
pub mod sambam;
pub mod stats;
