//! Source provenance: tag type, tag/commit signatures, and the trust
//! cross-check of signer keys.
//!
//! Nothing here can abort a run. Signature tool failures degrade to
//! [`SignatureStatus::Unavailable`] and untrusted keys become
//! [`TrustWarning`]s; the verdict never depends on provenance.

pub mod git;
pub mod gpg;

use std::fmt;
use std::io;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::trust::TrustStore;

pub use git::{is_git_repo, GitSignatureTool};
pub use gpg::{parse_signature_output, ParsedSignature};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("`{command}` failed: {stderr}")]
    Failed { command: String, stderr: String },
}

/// Tag dimension of provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagType {
    Unresolved,
    NoTagFound,
    Lightweight,
    Annotated,
}

impl fmt::Display for TagType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagType::Unresolved => write!(f, "unresolved"),
            TagType::NoTagFound => write!(f, "none"),
            TagType::Lightweight => write!(f, "lightweight"),
            TagType::Annotated => write!(f, "annotated"),
        }
    }
}

/// Git object type a tag ref points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectType {
    Commit,
    Tag,
    Other(String),
}

impl ObjectType {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "commit" => ObjectType::Commit,
            "tag" => ObjectType::Tag,
            other => ObjectType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignatureStatus {
    Good,
    Bad,
    Unsigned,
    MissingKey,
    /// The signature tool could not tell us anything.
    Unavailable,
    /// No object to check (no tag, or a lightweight tag).
    NotApplicable,
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignatureStatus::Good => "good",
            SignatureStatus::Bad => "bad",
            SignatureStatus::Unsigned => "unsigned",
            SignatureStatus::MissingKey => "missing-key",
            SignatureStatus::Unavailable => "unavailable",
            SignatureStatus::NotApplicable => "not-applicable",
        };
        f.write_str(s)
    }
}

/// Outcome of one `verify_tag` / `verify_commit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureCheck {
    pub status: SignatureStatus,
    pub key_id: Option<String>,
    pub raw_output: String,
}

impl SignatureCheck {
    /// Build from raw tool output and exit status.
    pub fn from_raw(raw_output: String, tool_succeeded: bool) -> Self {
        let ParsedSignature { status, key_id } = parse_signature_output(&raw_output, tool_succeeded);
        Self {
            status,
            key_id,
            raw_output,
        }
    }
}

/// Signature-checking capability over a source repository.
pub trait SignatureTool: Send + Sync {
    /// Object type of `refs/tags/<name>`, or `None` when no such tag exists.
    fn tag_object_type(&self, name: &str) -> Result<Option<ObjectType>, ToolError>;

    fn verify_tag(&self, name: &str) -> Result<SignatureCheck, ToolError>;

    /// Verify the commit `rev` resolves to (tags are peeled).
    fn verify_commit(&self, rev: &str) -> Result<SignatureCheck, ToolError>;

    /// Full commit id `rev` resolves to.
    fn resolve_commit(&self, rev: &str) -> Result<String, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignedObject {
    Tag,
    Commit,
}

impl fmt::Display for SignedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignedObject::Tag => write!(f, "tag"),
            SignedObject::Commit => write!(f, "commit"),
        }
    }
}

/// A signer key not listed in the trust store for the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustWarning {
    pub subject: SignedObject,
    pub key_id: String,
    pub repo_url: String,
    /// Exact command that would trust the key.
    pub remediation: String,
}

impl fmt::Display for TrustWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} signed with key {} which is not trusted for {}. To trust it, run: {}",
            self.subject, self.key_id, self.repo_url, self.remediation
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    pub revision: String,
    pub commit: Option<String>,
    pub tag_type: TagType,
    pub tag_signature_status: SignatureStatus,
    pub commit_signature_status: SignatureStatus,
    pub tag_key_id: Option<String>,
    pub commit_key_id: Option<String>,
    /// Raw tag verification output, shown in the report's revision block.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_output: Option<String>,
    pub warnings: Vec<TrustWarning>,
    /// Informational lines (lightweight tag, tool unavailable, ...).
    pub notes: Vec<String>,
}

impl ProvenanceRecord {
    /// Record for a run where no provenance check was possible.
    pub fn unavailable(revision: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            revision: revision.into(),
            commit: None,
            tag_type: TagType::Unresolved,
            tag_signature_status: SignatureStatus::Unavailable,
            commit_signature_status: SignatureStatus::Unavailable,
            tag_key_id: None,
            commit_key_id: None,
            tag_output: None,
            warnings: Vec::new(),
            notes: vec![reason.into()],
        }
    }
}

/// Runs the tag and commit state machines and the trust cross-check.
#[derive(Clone)]
pub struct ProvenanceVerifier {
    tool: Arc<dyn SignatureTool>,
    trust: Arc<TrustStore>,
}

impl ProvenanceVerifier {
    pub fn new(tool: Arc<dyn SignatureTool>, trust: Arc<TrustStore>) -> Self {
        Self { tool, trust }
    }

    pub fn verify(&self, revision: &str, repo_url: Option<&str>) -> ProvenanceRecord {
        let mut record = ProvenanceRecord {
            revision: revision.to_string(),
            commit: None,
            tag_type: TagType::Unresolved,
            tag_signature_status: SignatureStatus::NotApplicable,
            commit_signature_status: SignatureStatus::Unavailable,
            tag_key_id: None,
            commit_key_id: None,
            tag_output: None,
            warnings: Vec::new(),
            notes: Vec::new(),
        };

        self.check_tag(revision, &mut record);
        self.check_commit(revision, &mut record);

        match self.tool.resolve_commit(revision) {
            Ok(sha) => record.commit = Some(sha),
            Err(e) => debug!(revision, error = %e, "commit not resolved"),
        }

        match repo_url {
            Some(url) => self.cross_check(url, &mut record),
            None => record
                .notes
                .push("no repository URL given; signer keys were not checked against the trust store".to_string()),
        }
        record
    }

    fn check_tag(&self, revision: &str, record: &mut ProvenanceRecord) {
        match self.tool.tag_object_type(revision) {
            Ok(None) => {
                record.tag_type = TagType::NoTagFound;
                record
                    .notes
                    .push(format!("no tag named {revision}; verified the commit only"));
            }
            Ok(Some(ObjectType::Commit)) => {
                record.tag_type = TagType::Lightweight;
                record
                    .notes
                    .push(format!("{revision} is a lightweight tag and carries no signature"));
            }
            Ok(Some(ObjectType::Tag)) => {
                record.tag_type = TagType::Annotated;
                match self.tool.verify_tag(revision) {
                    Ok(check) => {
                        record.tag_signature_status = check.status;
                        record.tag_key_id = check.key_id;
                        record.tag_output = Some(check.raw_output);
                    }
                    Err(e) => {
                        warn!(revision, error = %e, "tag verification unavailable");
                        record.tag_signature_status = SignatureStatus::Unavailable;
                        record
                            .notes
                            .push(format!("no signature information available for tag {revision}: {e}"));
                    }
                }
            }
            Ok(Some(ObjectType::Other(kind))) => {
                record
                    .notes
                    .push(format!("tag {revision} points at a {kind} object; not verified"));
            }
            Err(e) => {
                warn!(revision, error = %e, "tag lookup unavailable");
                record.tag_signature_status = SignatureStatus::Unavailable;
                record
                    .notes
                    .push(format!("no signature information available for {revision}: {e}"));
            }
        }
    }

    fn check_commit(&self, revision: &str, record: &mut ProvenanceRecord) {
        match self.tool.verify_commit(revision) {
            Ok(check) => {
                record.commit_signature_status = check.status;
                record.commit_key_id = check.key_id;
            }
            Err(e) => {
                warn!(revision, error = %e, "commit verification unavailable");
                record.commit_signature_status = SignatureStatus::Unavailable;
                record.notes.push(format!(
                    "no signature information available for the commit of {revision}: {e}"
                ));
            }
        }
    }

    fn cross_check(&self, repo_url: &str, record: &mut ProvenanceRecord) {
        let keys = [
            (SignedObject::Tag, record.tag_key_id.clone()),
            (SignedObject::Commit, record.commit_key_id.clone()),
        ];
        for (subject, key) in keys {
            let Some(key) = key else { continue };
            if self.trust.is_trusted(repo_url, &key) {
                continue;
            }
            debug!(%subject, key_id = %key, repo_url, "untrusted signer key");
            record.warnings.push(TrustWarning {
                subject,
                remediation: self.trust.add_key_command(repo_url, &key),
                key_id: key,
                repo_url: repo_url.to_string(),
            });
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{good, FakeSignatureTool};
    use super::*;

    const REPO: &str = "https://github.com/example/app";

    fn trust(keys: &[&str]) -> Arc<TrustStore> {
        let mut store = TrustStore::empty();
        for key in keys {
            store.add_key(REPO, key).unwrap();
        }
        Arc::new(store)
    }

    fn verify(tool: FakeSignatureTool, keys: &[&str]) -> ProvenanceRecord {
        ProvenanceVerifier::new(Arc::new(tool), trust(keys)).verify("v1.2.3", Some(REPO))
    }

    #[test]
    fn annotated_tag_signed_by_trusted_key() {
        let record = verify(
            FakeSignatureTool {
                tag: Some(ObjectType::Tag),
                tag_check: Some(good("ABCD1234")),
                commit: Some("a".repeat(40)),
                ..Default::default()
            },
            &["ABCD1234"],
        );
        assert_eq!(record.tag_type, TagType::Annotated);
        assert_eq!(record.tag_signature_status, SignatureStatus::Good);
        assert_eq!(record.tag_key_id.as_deref(), Some("ABCD1234"));
        assert!(record.warnings.is_empty());
        assert_eq!(record.commit.as_deref(), Some("a".repeat(40).as_str()));
    }

    #[test]
    fn annotated_tag_signed_by_unknown_key_warns_once() {
        let record = verify(
            FakeSignatureTool {
                tag: Some(ObjectType::Tag),
                tag_check: Some(good("DEADBEEF")),
                ..Default::default()
            },
            &["ABCD1234"],
        );
        assert_eq!(record.tag_signature_status, SignatureStatus::Good);
        assert_eq!(record.warnings.len(), 1);
        let w = &record.warnings[0];
        assert_eq!(w.subject, SignedObject::Tag);
        assert_eq!(w.key_id, "DEADBEEF");
        assert_eq!(
            w.remediation,
            format!("rbv trust add --repo {REPO} --key DEADBEEF")
        );
        assert!(w.to_string().contains("DEADBEEF"));
    }

    #[test]
    fn lightweight_tag_is_informational_only() {
        let record = verify(
            FakeSignatureTool {
                tag: Some(ObjectType::Commit),
                ..Default::default()
            },
            &[],
        );
        assert_eq!(record.tag_type, TagType::Lightweight);
        assert_eq!(record.tag_signature_status, SignatureStatus::NotApplicable);
        assert!(record.warnings.is_empty());
        assert!(record.notes.iter().any(|n| n.contains("lightweight")));
    }

    #[test]
    fn missing_tag_proceeds_commit_only() {
        let record = verify(
            FakeSignatureTool {
                commit_check: Some(good("ABCD1234")),
                ..Default::default()
            },
            &["ABCD1234"],
        );
        assert_eq!(record.tag_type, TagType::NoTagFound);
        assert_eq!(record.commit_signature_status, SignatureStatus::Good);
        assert_eq!(record.commit_key_id.as_deref(), Some("ABCD1234"));
        assert!(record.warnings.is_empty());
    }

    #[test]
    fn missing_key_still_cross_checked() {
        let record = verify(
            FakeSignatureTool {
                commit_check: Some(SignatureCheck {
                    status: SignatureStatus::MissingKey,
                    key_id: Some("CAFEF00D".to_string()),
                    raw_output: String::new(),
                }),
                ..Default::default()
            },
            &[],
        );
        assert_eq!(record.warnings.len(), 1);
        assert_eq!(record.warnings[0].subject, SignedObject::Commit);
    }

    #[test]
    fn broken_tool_degrades_to_unavailable() {
        let record = verify(
            FakeSignatureTool {
                broken: true,
                ..Default::default()
            },
            &[],
        );
        assert_eq!(record.tag_type, TagType::Unresolved);
        assert_eq!(record.tag_signature_status, SignatureStatus::Unavailable);
        assert_eq!(record.commit_signature_status, SignatureStatus::Unavailable);
        assert_eq!(record.commit, None);
        assert!(record.warnings.is_empty());
        assert!(record
            .notes
            .iter()
            .any(|n| n.starts_with("no signature information available")));
    }

    #[test]
    fn without_repo_url_nothing_is_cross_checked() {
        let tool = FakeSignatureTool {
            tag: Some(ObjectType::Tag),
            tag_check: Some(good("DEADBEEF")),
            ..Default::default()
        };
        let record = ProvenanceVerifier::new(Arc::new(tool), trust(&[])).verify("v1", None);
        assert!(record.warnings.is_empty());
        assert!(record.notes.iter().any(|n| n.contains("trust store")));
    }

    #[test]
    fn signature_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&SignatureStatus::MissingKey).unwrap(),
            "\"missing-key\""
        );
        assert_eq!(TagType::NoTagFound.to_string(), "none");
    }
}
