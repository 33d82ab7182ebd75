use seq_io::fastq::{Reader, Record};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use log::debug;
use crate::utils::file::is_gzipped;

pub enum FastqReader {
    Uncompressed(BufReader<File>),
    Gzipped(MultiGzDecoder<File>),
}

impl Read for FastqReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            FastqReader::Uncompressed(r) => r.read(buf),
            FastqReader::Gzipped(r) => r.read(buf),
        }
    }
}

/// Opens a plain or gzipped FASTQ.
pub fn fastq_reader(path: &Path) -> io::Result<Reader<FastqReader>> {
    let file = File::open(path)?;
    let reader = if is_gzipped(path)? {
        Reader::new(FastqReader::Gzipped(MultiGzDecoder::new(file)))
    } else {
        Reader::new(FastqReader::Uncompressed(BufReader::new(file)))
    };
    Ok(reader)
}

pub fn write_fastq_record<W: Write>(
    writer: &mut W,
    head: &[u8],
    seq: &[u8],
    qual: &[u8],
) -> io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(head)?;
    writer.write_all(b"\n")?;
    writer.write_all(seq)?;
    writer.write_all(b"\n+\n")?;
    writer.write_all(qual)?;
    writer.write_all(b"\n")?;
    Ok(())
}


/// Number of records in a FASTQ.
pub fn count_fastq_records(path: &Path) -> Result<u64> {
    let mut reader = fastq_reader(path).with_context(|| format!("Cannot open {}", path.display()))?;
    let mut count = 0u64;
    while let Some(record) = reader.next() {
        record.with_context(|| format!("Malformed FASTQ {}", path.display()))?;
        count += 1;
    }
    Ok(count)
}

/// Copies the first `max_reads` records of `input` to `output`.
///
/// # Returns
/// Number of records written.
pub fn downsample_fastq(input: &Path, output: &Path, max_reads: usize) -> Result<u64> {
    let mut reader = fastq_reader(input).with_context(|| format!("Cannot open {}", input.display()))?;
    let mut writer = BufWriter::new(File::create(output)?);
    let mut written = 0u64;
    while written < max_reads as u64 {
        let Some(record) = reader.next() else { break };
        let record = record.with_context(|| format!("Malformed FASTQ {}", input.display()))?;
        write_fastq_record(&mut writer, record.head(), record.seq(), record.qual())?;
        written += 1;
    }
    writer.flush()?;
    debug!("Kept {} reads of {} in {}", written, input.display(), output.display());
    Ok(written)
}

/// Drops `trim` bases from the 3' end of every read. Reads keep at least one
/// base so mates stay in register.
///
/// # Returns
/// Number of records written.
pub fn trim_fastq(input: &Path, output: &Path, trim: usize) -> Result<u64> {
    let mut reader = fastq_reader(input).with_context(|| format!("Cannot open {}", input.display()))?;
    let mut writer = BufWriter::new(File::create(output)?);
    let mut written = 0u64;
    while let Some(record) = reader.next() {
        let record = record.with_context(|| format!("Malformed FASTQ {}", input.display()))?;
        let keep = record.seq().len().saturating_sub(trim).max(1).min(record.seq().len());
        write_fastq_record(&mut writer, record.head(), &record.seq()[..keep], &record.qual()[..keep])?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const READS: &[u8] = b"@r1 desc\nACGTACGTAC\n+\nIIIIIIIIII\n@r2\nGGGCC\n+\nHHHHH\n@r3\nTT\n+\n##\n";

    #[test]
    fn test_count_and_downsample() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.fastq");
        fs::write(&input, READS)?;
        assert_eq!(count_fastq_records(&input)?, 3);

        let output = dir.path().join("out.fastq");
        assert_eq!(downsample_fastq(&input, &output, 2)?, 2);
        assert_eq!(fs::read_to_string(&output)?, "@r1 desc\nACGTACGTAC\n+\nIIIIIIIIII\n@r2\nGGGCC\n+\nHHHHH\n");

        // Asking for more than available keeps everything
        assert_eq!(downsample_fastq(&input, &output, 100)?, 3);
        Ok(())
    }

    #[test]
    fn test_count_gzipped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.fastq.gz");
        let mut encoder = flate2::write::GzEncoder::new(File::create(&input)?, flate2::Compression::default());
        encoder.write_all(READS)?;
        encoder.finish()?;
        assert_eq!(count_fastq_records(&input)?, 3);
        Ok(())
    }

    #[test]
    fn test_trim_three_prime() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let input = dir.path().join("in.fastq");
        let output = dir.path().join("trim.fastq");
        fs::write(&input, READS)?;
        assert_eq!(trim_fastq(&input, &output, 3)?, 3);
        assert_eq!(
            fs::read_to_string(&output)?,
            "@r1 desc\nACGTACG\n+\nIIIIIII\n@r2\nGG\n+\nHH\n@r3\nT\n+\n#\n"
        );
        Ok(())
    }
}
