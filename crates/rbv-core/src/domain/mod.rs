//! Domain models for RBV.
//!
//! Canonical definitions for the core entities:
//! - `Artifact`: a release file on the official or built side
//! - `Slice` / `SliceSet`: normalized comparison units and their per-side sets
//! - `ContentTree`: unpacked slice content as path-to-digest entries
//! - `VerifyError` / `RunWarning`: fatal and recovered conditions

pub mod artifact;
pub mod digest;
pub mod error;
pub mod slice;

pub use artifact::{Artifact, ArtifactKind, Side};
pub use digest::Digest;
pub use error::{FatalKind, Result, RunWarning, VerifyError, WarningKind};
pub use slice::{ContentTree, DuplicateSlice, SetLayout, Slice, SliceId, SliceSet};
