//! Per-run working area for decomposed content.
//!
//! Layout: `<root>/official/<slice>/...` and `<root>/built/<slice>/...`.
//! A workspace belongs to exactly one run; an existing root is refused so a
//! run can never pick up stale content from an earlier one.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::domain::{Result, Side, VerifyError};

#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Create the workspace at `root`. Fails with
    /// [`VerifyError::WorkspaceConflict`] if anything already exists there.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if root.exists() || root.symlink_metadata().is_ok() {
            return Err(VerifyError::WorkspaceConflict { path: root });
        }
        for side in [Side::Official, Side::Built] {
            let dir = root.join(side.dir_name());
            fs::create_dir_all(&dir).map_err(|source| VerifyError::Workspace {
                path: dir.clone(),
                source,
            })?;
        }
        debug!(root = %root.display(), "workspace created");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Root directory for one side's slices.
    pub fn side_root(&self, side: Side) -> PathBuf {
        self.root.join(side.dir_name())
    }

    /// Directory holding one slice's unpacked content.
    pub fn slice_dir(&self, side: Side, slice: &str) -> PathBuf {
        self.side_root(side).join(slice)
    }

    /// End the run: keep the tree for inspection, or delete it.
    pub fn finish(self, keep: bool) -> Result<Option<PathBuf>> {
        if keep {
            info!(root = %self.root.display(), "workspace kept");
            return Ok(Some(self.root));
        }
        fs::remove_dir_all(&self.root).map_err(|source| VerifyError::Workspace {
            path: self.root.clone(),
            source,
        })?;
        debug!(root = %self.root.display(), "workspace removed");
        Ok(None)
    }
}
