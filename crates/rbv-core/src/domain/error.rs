//! Error taxonomy for a verification run.
//!
//! Fatal conditions are [`VerifyError`] values and abort the run before a
//! verdict exists. Recoverable conditions never become errors: they are
//! recorded as [`RunWarning`]s and surface in the report's `Also:` block.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Exit code for an unsupported or mismatched artifact identity.
pub const EXIT_IDENTITY_MISMATCH: i32 = 2;

/// Exit code for any other fatal precondition failure.
pub const EXIT_PRECONDITION_FAILED: i32 = 3;

/// Fatal verification errors.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("identity mismatch: declared app id '{declared}' but expected '{expected}'")]
    UnexpectedAppId { declared: String, expected: String },

    #[error("identity mismatch: official artifacts are {official} but built artifacts are {built}")]
    LayoutMismatch { official: String, built: String },

    #[error("identity mismatch: no usable official artifacts to verify")]
    NoOfficialArtifacts,

    #[error("unsupported app: no profile registered for '{app_id}'")]
    UnsupportedApp { app_id: String },

    #[error("workspace {} already exists", path.display())]
    WorkspaceConflict { path: PathBuf },

    #[error("workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to list {side} artifacts: {source}")]
    ArtifactListing {
        side: String,
        #[source]
        source: std::io::Error,
    },

    #[error("diff worker failed: {0}")]
    Worker(String),
}

/// Coarse classification of a fatal error, used for exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    IdentityMismatch,
    WorkspaceConflict,
    Internal,
}

impl VerifyError {
    pub fn kind(&self) -> FatalKind {
        match self {
            VerifyError::UnexpectedAppId { .. }
            | VerifyError::LayoutMismatch { .. }
            | VerifyError::NoOfficialArtifacts
            | VerifyError::UnsupportedApp { .. } => FatalKind::IdentityMismatch,
            VerifyError::WorkspaceConflict { .. } => FatalKind::WorkspaceConflict,
            VerifyError::Workspace { .. }
            | VerifyError::ArtifactListing { .. }
            | VerifyError::Worker(_) => FatalKind::Internal,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            FatalKind::IdentityMismatch => EXIT_IDENTITY_MISMATCH,
            FatalKind::WorkspaceConflict | FatalKind::Internal => EXIT_PRECONDITION_FAILED,
        }
    }

    /// The action an operator can take to resolve the error, if one exists.
    pub fn remediation(&self) -> Option<String> {
        match self {
            VerifyError::UnexpectedAppId { expected, .. } => Some(format!(
                "Check that the artifacts belong to '{expected}', or select the matching app profile with --app-id."
            )),
            VerifyError::LayoutMismatch { .. } => Some(
                "Provide the same artifact type on both sides: either one single APK each, or the full split set each."
                    .to_string(),
            ),
            VerifyError::NoOfficialArtifacts => Some(
                "Pass the official release artifacts with --official <dir|file>.".to_string(),
            ),
            VerifyError::UnsupportedApp { app_id } => Some(format!(
                "Add an [[app]] entry for '{app_id}' to the profiles file, or verify without --build."
            )),
            VerifyError::WorkspaceConflict { path } => {
                Some(format!("rm -rf {}", path.display()))
            }
            VerifyError::Workspace { path, .. } => Some(format!(
                "Check permissions and free space for {}.",
                path.display()
            )),
            VerifyError::ArtifactListing { .. } | VerifyError::Worker(_) => None,
        }
    }
}

/// Result type for verification operations.
pub type Result<T> = std::result::Result<T, VerifyError>;

/// Category of a recoverable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Identifier collision, rejected name, missing required artifact.
    Configuration,
    /// Unreadable archive, unavailable signature tool.
    ExternalTool,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::Configuration => write!(f, "configuration"),
            WarningKind::ExternalTool => write!(f, "external-tool"),
        }
    }
}

/// A recovered condition carried into the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunWarning {
    pub kind: WarningKind,
    pub message: String,
}

impl RunWarning {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::Configuration,
            message: message.into(),
        }
    }

    pub fn external_tool(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::ExternalTool,
            message: message.into(),
        }
    }
}

impl fmt::Display for RunWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} warning: {}", self.kind, self.message)
    }
}
