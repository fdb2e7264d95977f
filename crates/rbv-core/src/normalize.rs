//! Artifact name normalization.
//!
//! Device extraction yields `base.apk` + `split_config.<X>.apk`, bundletool
//! yields `base-master.apk` + `base-<X>.apk`, and single-APK apps ship any
//! name at all. Everything maps onto one identifier space so the official
//! and built sides can be matched slice by slice.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::domain::{ArtifactKind, RunWarning, Side, SliceId};

const APK_SUFFIX: &str = ".apk";
const BASE_PREFIX: &str = "base-";
const SPLIT_CONFIG_PREFIX: &str = "split_config.";
const BASE_ID: &str = "base";

/// Outcome of normalizing one raw filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Slice { id: SliceId, kind: ArtifactKind },
    Rejected { reason: String },
}

impl Normalized {
    fn slice(id: &str, kind: ArtifactKind) -> Self {
        Normalized::Slice {
            id: SliceId::new(id),
            kind,
        }
    }

    fn rejected(reason: impl Into<String>) -> Self {
        Normalized::Rejected {
            reason: reason.into(),
        }
    }

    pub fn id(&self) -> Option<&SliceId> {
        match self {
            Normalized::Slice { id, .. } => Some(id),
            Normalized::Rejected { .. } => None,
        }
    }
}

/// Map a raw artifact filename to its canonical slice identifier.
pub fn normalize(raw: &str) -> Normalized {
    let name = raw.trim();
    if name.is_empty() {
        return Normalized::rejected("empty file name");
    }
    if name.contains(['/', '\\', '\0']) {
        return Normalized::rejected(format!("'{raw}' is not a plain file name"));
    }

    if name == "base.apk" || name == "base-master.apk" {
        return Normalized::slice(BASE_ID, ArtifactKind::Split);
    }

    if let Some(rest) = name.strip_prefix(SPLIT_CONFIG_PREFIX) {
        if let Some(config) = rest.strip_suffix(APK_SUFFIX) {
            return checked_stem(raw, config, ArtifactKind::Split);
        }
    }

    if let Some(rest) = name.strip_prefix(BASE_PREFIX) {
        if let Some(split) = rest.strip_suffix(APK_SUFFIX) {
            return checked_stem(raw, split, ArtifactKind::Split);
        }
    }

    let (stem, had_base_prefix) = match name.strip_prefix(BASE_PREFIX) {
        Some(rest) => (rest, true),
        None => (name, false),
    };
    let stem = stem.strip_suffix(APK_SUFFIX).unwrap_or(stem);
    let kind = if had_base_prefix || stem == BASE_ID {
        ArtifactKind::Split
    } else {
        ArtifactKind::Single
    };
    checked_stem(raw, stem, kind)
}

fn checked_stem(raw: &str, stem: &str, kind: ArtifactKind) -> Normalized {
    if stem.is_empty() || stem.starts_with('.') {
        Normalized::rejected(format!("'{raw}' leaves no usable slice identifier"))
    } else {
        Normalized::slice(stem, kind)
    }
}

/// Normalize the final component of `path`.
pub fn normalize_path(path: &Path) -> Normalized {
    match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => normalize(name),
        None => Normalized::rejected(format!(
            "'{}' has no UTF-8 file name",
            path.display()
        )),
    }
}

/// A successfully normalized artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedArtifact {
    pub id: SliceId,
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

/// Normalized artifacts for one side plus the warnings raised on the way.
#[derive(Debug, Clone, Default)]
pub struct NormalizedSide {
    pub artifacts: Vec<NormalizedArtifact>,
    pub warnings: Vec<RunWarning>,
}

impl NormalizedSide {
    pub fn kinds(&self) -> Vec<ArtifactKind> {
        self.artifacts.iter().map(|a| a.kind).collect()
    }

    /// Whether this side is one lone non-split artifact.
    pub fn is_single(&self) -> bool {
        matches!(self.artifacts.as_slice(), [only] if only.kind == ArtifactKind::Single)
    }

    /// Whether this side is a split set holding nothing but the base slice,
    /// as pulled from a device for an app without splits.
    pub fn is_lone_base(&self) -> bool {
        matches!(
            self.artifacts.as_slice(),
            [only] if only.kind == ArtifactKind::Split && only.id.as_str() == BASE_ID
        )
    }
}

/// Normalize every artifact on one side.
///
/// Rejected names are excluded with a warning. When two raw names collapse to
/// one identifier the first one wins and the collision is reported; it is
/// never a silent overwrite.
pub fn normalize_side(side: Side, paths: &[PathBuf]) -> NormalizedSide {
    let mut out = NormalizedSide::default();

    for path in paths {
        match normalize_path(path) {
            Normalized::Rejected { reason } => {
                warn!(side = %side, path = %path.display(), %reason, "artifact name rejected");
                out.warnings.push(RunWarning::configuration(format!(
                    "{side} artifact {} excluded from matching: {reason}",
                    path.display()
                )));
            }
            Normalized::Slice { id, kind } => {
                if let Some(existing) = out.artifacts.iter().find(|a| a.id == id) {
                    warn!(side = %side, id = %id, "slice identifier collision");
                    out.warnings.push(RunWarning::configuration(format!(
                        "identifier collision on the {side} side: {} and {} both normalize to '{id}'; keeping {}",
                        file_label(&existing.path),
                        file_label(path),
                        file_label(&existing.path),
                    )));
                    continue;
                }
                out.artifacts.push(NormalizedArtifact {
                    id,
                    kind,
                    path: path.clone(),
                });
            }
        }
    }

    out
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
