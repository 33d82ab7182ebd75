use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use anyhow::{anyhow, Context, Result};

fn is_header(line: &str) -> bool {
    line.starts_with('@')
}

fn for_each_line<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(&str) -> Result<()>,
{
    let reader = BufReader::new(File::open(path).with_context(|| format!("Cannot open {}", path.display()))?);
    for line in reader.lines() {
        f(&line.with_context(|| format!("Cannot read {}", path.display()))?)?;
    }
    Ok(())
}

/// Merges partial SAM outputs: header lines of the first file, then the
/// alignment lines of every file in the given order.
///
/// # Returns
/// Number of alignment lines written.
pub fn merge_sam_files(inputs: &[&Path], output: &Path) -> Result<u64> {
    let first = inputs.first().ok_or_else(|| anyhow!("No SAM files to merge"))?;
    let mut writer = BufWriter::new(File::create(output)?);

    for_each_line(first, |line| {
        if is_header(line) {
            writeln!(writer, "{}", line)?;
        }
        Ok(())
    })?;

    let mut body_lines = 0u64;
    for input in inputs {
        for_each_line(input, |line| {
            if !is_header(line) {
                writeln!(writer, "{}", line)?;
                body_lines += 1;
            }
            Ok(())
        })?;
    }
    writer.flush()?;
    Ok(body_lines)
}

/// Counts alignment (non-header) lines.
pub fn sam_alignment_count(path: &Path) -> Result<u64> {
    let mut counter = 0u64;
    for_each_line(path, |line| {
        if !is_header(line) && !line.is_empty() {
            counter += 1;
        }
        Ok(())
    })?;
    Ok(counter)
}



#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_merge_keeps_first_header_and_all_bodies() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sam1 = dir.path().join("s_1.sam");
        let sam2 = dir.path().join("s_2.sam");
        let sam3 = dir.path().join("s_3.sam");
        fs::write(&sam1, "@HD\tVN:1.0\n@SQ\tSN:chr1\tLN:100\nr1\t0\tchr1\t5\n")?;
        fs::write(&sam2, "@HD\tVN:1.0\n@SQ\tSN:chr1\tLN:100\n@PG\tID:bowtie\nr2\t16\tchr1\t9\nr3\t0\tchr1\t20\n")?;
        fs::write(&sam3, "@HD\tVN:1.0\nr4\t0\tchr1\t40\n")?;

        let merged = dir.path().join("s_all.sam");
        let count = merge_sam_files(&[sam1.as_path(), sam2.as_path(), sam3.as_path()], &merged)?;
        assert_eq!(count, 4);
        assert_eq!(
            fs::read_to_string(&merged)?,
            "@HD\tVN:1.0\n@SQ\tSN:chr1\tLN:100\nr1\t0\tchr1\t5\nr2\t16\tchr1\t9\nr3\t0\tchr1\t20\nr4\t0\tchr1\t40\n"
        );
        assert_eq!(sam_alignment_count(&merged)?, 4);
        Ok(())
    }

    #[test]
    fn test_merge_header_only_inputs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let sam1 = dir.path().join("a.sam");
        fs::write(&sam1, "@HD\tVN:1.0\n")?;
        let merged = dir.path().join("all.sam");
        assert_eq!(merge_sam_files(&[sam1.as_path(), sam1.as_path()], &merged)?, 0);
        assert_eq!(fs::read_to_string(&merged)?, "@HD\tVN:1.0\n");
        Ok(())
    }

    #[test]
    fn test_merge_requires_input() {
        let dir = tempfile::tempdir().unwrap();
        assert!(merge_sam_files(&[], &dir.path().join("x.sam")).is_err());
    }
}
