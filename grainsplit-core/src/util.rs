use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use path_abs::{PathAbs, PathInfo};

/// Check that every required external tool is reachable, before any work
/// starts.
#[inline]
pub fn validate_tools(tools: &[&str]) -> Result<()> {
    for tool in tools {
        if which::which(tool).is_err() {
            bail!("{tool} not found. Is it installed in the system path?");
        }
    }
    Ok(())
}

#[inline]
pub fn to_absolute_path(path: &Path) -> io::Result<PathBuf> {
    let path = PathAbs::new(path)?;
    Ok(path.as_path().to_path_buf())
}

/// List the file stems of segment files (`*.mkv`) in a directory, sorted by
/// name. Segment names are fixed-width zero-padded, so a lexical sort is also
/// the numeric order.
#[inline]
pub fn list_segment_stems(dir: &Path) -> Result<Vec<String>> {
    let mut stems: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("Failed to read segment directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "mkv"))
        .filter_map(|path| path.file_stem().and_then(|s| s.to_str()).map(String::from))
        .collect();
    stems.sort_unstable();
    Ok(stems)
}
