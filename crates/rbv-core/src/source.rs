//! Where the engine gets its artifact path lists from.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File extensions picked up when a directory is given as input.
pub const ARTIFACT_EXTENSIONS: &[&str] = &["apk", "aab", "bin", "img", "zip"];

/// Supplies the official and built artifact paths for one run.
pub trait ArtifactSource: Send + Sync {
    fn list_official(&self) -> io::Result<Vec<PathBuf>>;
    fn list_built(&self) -> io::Result<Vec<PathBuf>>;
}

/// Artifact source over files and directories on disk.
#[derive(Debug, Clone, Default)]
pub struct PathArtifactSource {
    official: Vec<PathBuf>,
    built: Vec<PathBuf>,
}

impl PathArtifactSource {
    pub fn new(official: Vec<PathBuf>, built: Vec<PathBuf>) -> Self {
        Self { official, built }
    }
}

impl ArtifactSource for PathArtifactSource {
    fn list_official(&self) -> io::Result<Vec<PathBuf>> {
        expand_artifact_paths(&self.official)
    }

    fn list_built(&self) -> io::Result<Vec<PathBuf>> {
        expand_artifact_paths(&self.built)
    }
}

/// Expand inputs into artifact files.
///
/// Files are taken as given. A directory contributes its direct children with
/// a known artifact extension, sorted by name. Missing inputs are an error.
pub fn expand_artifact_paths(inputs: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        let meta = fs::metadata(input).map_err(|e| {
            io::Error::new(e.kind(), format!("{}: {e}", input.display()))
        })?;
        if meta.is_dir() {
            let mut found = Vec::new();
            for entry in fs::read_dir(input)? {
                let path = entry?.path();
                if path.is_file() && has_artifact_extension(&path) {
                    found.push(path);
                }
            }
            found.sort();
            out.extend(found);
        } else {
            out.push(input.clone());
        }
    }
    Ok(out)
}

fn has_artifact_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ARTIFACT_EXTENSIONS.iter().any(|known| e.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}
