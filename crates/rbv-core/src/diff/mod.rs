//! Slice-set comparison.
//!
//! This module provides:
//! - Path-level content tree diffing (`tree` submodule)
//! - Bounded parallel comparison over slices (`pool` submodule)
//! - Signature-noise classification and the reproducibility verdict
//!
//! Results are always ordered official-set first, then built-only extras,
//! whether computed sequentially or on the worker pool.

pub mod pool;
pub mod tree;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{ContentTree, Result, SliceId, SliceSet, VerifyError};

pub use tree::diff_trees;

/// Directory holding APK/JAR signing metadata.
pub const SIGNING_METADATA_DIR: &str = "META-INF";

/// Default number of slices diffed concurrently.
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Whether a differing path matters for reproducibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    SignatureNoise,
    Substantive,
}

/// How a path differs between the two sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathChange {
    OnlyInOfficial,
    OnlyInBuilt,
    ContentDiffers,
}

/// One differing path inside a slice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifferingPath {
    pub path: String,
    pub change: PathChange,
    pub classification: Classification,
}

/// Which side a slice is missing from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentDirection {
    OfficialOnly,
    BuiltOnly,
}

impl fmt::Display for AbsentDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsentDirection::OfficialOnly => write!(f, "official-only"),
            AbsentDirection::BuiltOnly => write!(f, "built-only"),
        }
    }
}

/// Per-slice comparison outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiffOutcome {
    Matched,
    Differing { paths: Vec<DifferingPath> },
    Absent { direction: AbsentDirection },
}

/// Comparison result for one slice identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub slice: SliceId,
    #[serde(flatten)]
    pub outcome: DiffOutcome,
}

impl DiffResult {
    pub fn absent(slice: SliceId, direction: AbsentDirection) -> Self {
        Self {
            slice,
            outcome: DiffOutcome::Absent { direction },
        }
    }

    /// Build from a path-level diff: empty means matched.
    pub fn from_paths(slice: SliceId, paths: Vec<DifferingPath>) -> Self {
        let outcome = if paths.is_empty() {
            DiffOutcome::Matched
        } else {
            DiffOutcome::Differing { paths }
        };
        Self { slice, outcome }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self.outcome, DiffOutcome::Absent { .. })
    }

    pub fn differing_paths(&self) -> &[DifferingPath] {
        match &self.outcome {
            DiffOutcome::Differing { paths } => paths,
            _ => &[],
        }
    }

    pub fn substantive_count(&self) -> usize {
        self.differing_paths()
            .iter()
            .filter(|p| p.classification == Classification::Substantive)
            .count()
    }

    pub fn noise_count(&self) -> usize {
        self.differing_paths().len() - self.substantive_count()
    }
}

/// Classifies paths as signing metadata or substantive content.
///
/// Anchored on the first path component: `META-INF/CERT.SF` is noise,
/// `assets/META-INF/x` and `META-INF.bak/x` are not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    signing_dir: String,
}

impl Classifier {
    pub fn new(signing_dir: impl Into<String>) -> Self {
        Self {
            signing_dir: signing_dir.into(),
        }
    }

    pub fn classify(&self, path: &str) -> Classification {
        let mut components = path.split('/').filter(|c| !c.is_empty());
        match (components.next(), components.next()) {
            (Some(root), Some(_)) if root == self.signing_dir => Classification::SignatureNoise,
            _ => Classification::Substantive,
        }
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(SIGNING_METADATA_DIR)
    }
}

/// The single reproducibility conclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "reproducible")]
    Reproducible,
    #[serde(rename = "differences found")]
    DifferencesFound,
}

impl Verdict {
    /// Reproducible iff no slice is absent and no differing path is substantive.
    pub fn from_results(results: &[DiffResult]) -> Self {
        let clean = results
            .iter()
            .all(|r| !r.is_absent() && r.substantive_count() == 0);
        if clean {
            Verdict::Reproducible
        } else {
            Verdict::DifferencesFound
        }
    }

    pub fn exit_code(self) -> i32 {
        match self {
            Verdict::Reproducible => 0,
            Verdict::DifferencesFound => 1,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Reproducible => write!(f, "reproducible"),
            Verdict::DifferencesFound => write!(f, "differences found"),
        }
    }
}

/// Refuse to compare a lone non-split artifact against a multi-slice set.
pub fn ensure_comparable(official: &SliceSet, built: &SliceSet) -> Result<()> {
    let (o, b) = (official.layout(), built.layout());
    if o.conflicts_with(b) {
        return Err(VerifyError::LayoutMismatch {
            official: o.to_string(),
            built: b.to_string(),
        });
    }
    Ok(())
}

/// One unit of work in a comparison, in report order.
pub(crate) enum PlannedSlice {
    Pair {
        id: SliceId,
        official: Arc<ContentTree>,
        built: Arc<ContentTree>,
    },
    Absent {
        id: SliceId,
        direction: AbsentDirection,
    },
}

pub(crate) fn plan(official: &SliceSet, built: &SliceSet) -> Vec<PlannedSlice> {
    let mut planned = Vec::with_capacity(official.len() + built.len());
    for slice in official.iter() {
        match built.get(&slice.id) {
            Some(counterpart) => planned.push(PlannedSlice::Pair {
                id: slice.id.clone(),
                official: Arc::clone(&slice.tree),
                built: Arc::clone(&counterpart.tree),
            }),
            None => planned.push(PlannedSlice::Absent {
                id: slice.id.clone(),
                direction: AbsentDirection::OfficialOnly,
            }),
        }
    }
    for slice in built.iter().filter(|s| !official.contains(&s.id)) {
        planned.push(PlannedSlice::Absent {
            id: slice.id.clone(),
            direction: AbsentDirection::BuiltOnly,
        });
    }
    planned
}

/// Compares slice sets.
#[derive(Debug, Clone)]
pub struct DiffEngine {
    classifier: Classifier,
    max_concurrent: usize,
}

impl DiffEngine {
    pub fn new(classifier: Classifier, max_concurrent: usize) -> Self {
        Self {
            classifier,
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Compare two sets on the calling thread.
    pub fn compare(&self, official: &SliceSet, built: &SliceSet) -> Result<Vec<DiffResult>> {
        ensure_comparable(official, built)?;
        Ok(plan(official, built)
            .into_iter()
            .map(|item| match item {
                PlannedSlice::Pair {
                    id,
                    official,
                    built,
                } => DiffResult::from_paths(id, diff_trees(&official, &built, &self.classifier)),
                PlannedSlice::Absent { id, direction } => DiffResult::absent(id, direction),
            })
            .collect())
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new(Classifier::default(), DEFAULT_MAX_CONCURRENT)
    }
}
