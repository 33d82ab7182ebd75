use std::fs::File;
use std::io;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Checks the gzip magic bytes. Files shorter than two bytes are not gzipped.
pub fn is_gzipped(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1F, 0x8B]), // Gzip magic bytes
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}


/// Derives an artifact path from a target basename by plain concatenation.
///
/// # Arguments
///
/// * `target` - Per-sample basename, e.g. `out/rep1`.
/// * `suffix` - Fixed suffix, e.g. `_all.sam`.
///
/// # Returns
/// `out/rep1_all.sam`
pub fn target_path(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Paths bowtie writes for a paired `--un`/`--max` base path: `x.fastq` -> `x_1.fastq`, `x_2.fastq`.
pub fn mate_paths(base: &Path) -> Vec<PathBuf> {
    let stem = base.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = base.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    (1..=2)
        .map(|mate| base.with_file_name(format!("{}_{}{}", stem, mate, ext)))
        .collect()
}
