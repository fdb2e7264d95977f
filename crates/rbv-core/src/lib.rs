//! RBV Core Library
//!
//! Reproducible build verification: normalize official and rebuilt
//! artifacts into comparable slices, diff their contents while ignoring
//! signing metadata, check source provenance against a trust store, and
//! aggregate everything into one deterministic report.

pub mod decompose;
pub mod diff;
pub mod domain;
pub mod engine;
pub mod normalize;
pub mod obs;
pub mod profile;
pub mod provenance;
pub mod report;
pub mod source;
pub mod telemetry;
pub mod trust;
pub mod workspace;

pub use decompose::{
    content_tree, ArchiveError, ArchiveReader, Decomposer, RawImageReader, ZipArchiveReader,
};
pub use diff::{
    diff_trees, ensure_comparable, AbsentDirection, Classification, Classifier, DiffEngine,
    DiffOutcome, DiffResult, DifferingPath, PathChange, Verdict, SIGNING_METADATA_DIR,
};
pub use domain::{
    Artifact, ArtifactKind, ContentTree, Digest, FatalKind, Result, RunWarning, SetLayout, Side,
    Slice, SliceId, SliceSet, VerifyError, WarningKind,
};
pub use engine::{EngineConfig, RunOutcome, VerificationEngine, VerificationRequest};
pub use normalize::{normalize, normalize_side, Normalized, NormalizedArtifact, NormalizedSide};
pub use profile::{
    AppCapabilities, AppProfile, ArtifactFamily, BuildOutput, ProfileError, ProfileRegistry,
};
pub use provenance::{
    GitSignatureTool, ObjectType, ProvenanceRecord, ProvenanceVerifier, SignatureCheck,
    SignatureStatus, SignatureTool, SignedObject, TagType, ToolError, TrustWarning,
};
pub use report::{
    aggregate, DisplayOptions, ReportMetadata, ReportWarning, VerificationReport,
    DEFAULT_PREVIEW_PATHS,
};
pub use source::{expand_artifact_paths, ArtifactSource, PathArtifactSource};
pub use telemetry::init_tracing;
pub use trust::{TrustStore, TrustStoreError};
pub use workspace::Workspace;
