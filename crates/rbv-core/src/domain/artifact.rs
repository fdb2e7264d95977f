use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Which side of the comparison an artifact belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// Published by the developer (store download, device extraction).
    Official,
    /// Produced by rebuilding the declared source revision.
    Built,
}

impl Side {
    /// Directory name used for this side inside a workspace.
    pub fn dir_name(self) -> &'static str {
        match self {
            Side::Official => "official",
            Side::Built => "built",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Whether an artifact is a stand-alone package or one part of a split set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Single,
    Split,
}

/// A binary release file on one side of the comparison.
///
/// The declared app id, version name and version code belong to the release
/// as a whole, not to each file. They are given once per run in
/// [`ReportMetadata`](crate::report::ReportMetadata), checked against the
/// app profile before any artifact is read, and copied into the report's
/// `appId`, `apkVersionName` and `apkVersionCode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub side: Side,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, side: Side) -> Self {
        Self {
            path: path.into(),
            side,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final path component, lossily converted for display.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_display_matches_workspace_dirs() {
        assert_eq!(Side::Official.to_string(), "official");
        assert_eq!(Side::Built.dir_name(), "built");
    }

    #[test]
    fn artifact_file_name() {
        let a = Artifact::new("/tmp/x/split_config.en.apk", Side::Built);
        assert_eq!(a.file_name(), "split_config.en.apk");
    }
}
