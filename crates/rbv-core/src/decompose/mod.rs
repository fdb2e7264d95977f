//! Slice decomposition: unpack an artifact under a per-side root and index it.
//!
//! The decomposer owns only the destination layout,
//! `<side root>/<slice id>/...`, so official and built content share the same
//! relative substructure. Unpacking itself is delegated to an
//! [`ArchiveReader`].

pub mod archive;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use crate::domain::{Artifact, ContentTree, Digest, SliceId};

pub use archive::{ArchiveError, ArchiveReader, RawImageReader, ZipArchiveReader};

/// Unpacks artifacts into content trees.
#[derive(Clone)]
pub struct Decomposer {
    reader: Arc<dyn ArchiveReader>,
}

impl Decomposer {
    pub fn new(reader: Arc<dyn ArchiveReader>) -> Self {
        Self { reader }
    }

    /// Unpack `artifact` into `dest_root/<id>` and return its content tree.
    ///
    /// The source artifact is only read. The slice directory must not exist
    /// yet; a fresh workspace guarantees that.
    pub fn decompose(
        &self,
        artifact: &Artifact,
        id: &SliceId,
        dest_root: &Path,
    ) -> Result<ContentTree, ArchiveError> {
        let dest = dest_root.join(id.as_str());
        fs::create_dir_all(&dest)?;
        self.reader.unpack(&artifact.path, &dest)?;
        let tree = content_tree(&dest)?;
        debug!(
            side = %artifact.side,
            slice = %id,
            files = tree.len(),
            "slice decomposed"
        );
        Ok(tree)
    }
}

/// Index every regular file under `root` by its `/`-separated relative path.
pub fn content_tree(root: &Path) -> Result<ContentTree, ArchiveError> {
    let mut tree = ContentTree::new();

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| ArchiveError::Unreadable {
            path: root.to_path_buf(),
            detail: e.to_string(),
        })?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| ArchiveError::Unreadable {
                path: entry.path().to_path_buf(),
                detail: e.to_string(),
            })?;
        let key = relative_key(relative);
        if file_type.is_symlink() {
            return Err(ArchiveError::UnsafeEntry {
                path: root.to_path_buf(),
                entry: key,
            });
        }
        tree.insert(key, Digest::of_file(entry.path())?);
    }

    Ok(tree)
}

fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
