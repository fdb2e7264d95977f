//! Slices: the canonical comparison units derived from release artifacts.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::artifact::{ArtifactKind, Side};
use crate::domain::digest::Digest;

/// Canonical slice identifier (`base`, `arm64_v8a`, `xxhdpi`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SliceId(String);

impl SliceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unpacked content of one slice: `/`-separated relative path to digest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentTree {
    entries: BTreeMap<String, Digest>,
}

impl ContentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, digest: Digest) {
        self.entries.insert(path.into(), digest);
    }

    pub fn get(&self, path: &str) -> Option<&Digest> {
        self.entries.get(path)
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Digest)> {
        self.entries.iter().map(|(p, d)| (p.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, Digest)> for ContentTree {
    fn from_iter<I: IntoIterator<Item = (String, Digest)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One comparable unit.
#[derive(Debug, Clone)]
pub struct Slice {
    pub id: SliceId,
    pub source_path: PathBuf,
    pub kind: ArtifactKind,
    pub tree: Arc<ContentTree>,
}

/// Returned when a slice identifier is already present in a set.
#[derive(Debug, thiserror::Error)]
#[error("duplicate slice identifier '{id}' on the {side} side")]
pub struct DuplicateSlice {
    pub id: SliceId,
    pub side: Side,
}

/// Shape of a slice set, used to detect single-vs-split mismatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetLayout {
    Empty,
    /// Exactly one slice, from a non-split artifact.
    Single,
    /// Split slices (count).
    Split(usize),
}

impl SetLayout {
    pub fn of(kinds: &[ArtifactKind]) -> Self {
        match kinds {
            [] => SetLayout::Empty,
            [ArtifactKind::Single] => SetLayout::Single,
            _ => SetLayout::Split(kinds.len()),
        }
    }

    /// A lone non-split artifact can never be compared against a multi-slice set.
    pub fn conflicts_with(self, other: SetLayout) -> bool {
        matches!(
            (self, other),
            (SetLayout::Single, SetLayout::Split(n)) | (SetLayout::Split(n), SetLayout::Single) if n > 1
        )
    }
}

impl fmt::Display for SetLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetLayout::Empty => write!(f, "empty"),
            SetLayout::Single => write!(f, "a single non-split artifact"),
            SetLayout::Split(n) => write!(f, "{n} split slice(s)"),
        }
    }
}

/// All slices on one side of a run. Identifiers are unique; insertion order
/// is preserved and drives report ordering.
#[derive(Debug, Clone)]
pub struct SliceSet {
    side: Side,
    slices: Vec<Slice>,
}

impl SliceSet {
    pub fn new(side: Side) -> Self {
        Self {
            side,
            slices: Vec::new(),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn insert(&mut self, slice: Slice) -> Result<(), DuplicateSlice> {
        if self.contains(&slice.id) {
            return Err(DuplicateSlice {
                id: slice.id,
                side: self.side,
            });
        }
        self.slices.push(slice);
        Ok(())
    }

    pub fn get(&self, id: &SliceId) -> Option<&Slice> {
        self.slices.iter().find(|s| &s.id == id)
    }

    pub fn contains(&self, id: &SliceId) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter()
    }

    pub fn ids(&self) -> Vec<SliceId> {
        self.slices.iter().map(|s| s.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.slices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    pub fn layout(&self) -> SetLayout {
        let kinds: Vec<ArtifactKind> = self.slices.iter().map(|s| s.kind).collect();
        SetLayout::of(&kinds)
    }
}
