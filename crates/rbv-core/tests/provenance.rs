//! Provenance and trust store behaviour through the public API.

use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;

use rbv_core::{
    EngineConfig, ObjectType, PathArtifactSource, ProvenanceVerifier, ReportMetadata,
    ReportWarning, SignatureCheck, SignatureStatus, SignatureTool, SignedObject, TagType,
    ToolError, TrustStore, Verdict, VerificationEngine, VerificationRequest, ZipArchiveReader,
};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const REPO: &str = "https://github.com/example/wallet";
const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

/// Repository with one annotated tag signed by `tag_key` on an unsigned commit.
struct SignedTagRepo {
    tag_key: &'static str,
}

impl SignatureTool for SignedTagRepo {
    fn tag_object_type(&self, name: &str) -> Result<Option<ObjectType>, ToolError> {
        Ok((name == "v1.2.3").then_some(ObjectType::Tag))
    }

    fn verify_tag(&self, _name: &str) -> Result<SignatureCheck, ToolError> {
        Ok(SignatureCheck::from_raw(
            format!(
                "[GNUPG:] GOODSIG {key} Release Bot <release@example.org>\n",
                key = self.tag_key
            ),
            true,
        ))
    }

    fn verify_commit(&self, _rev: &str) -> Result<SignatureCheck, ToolError> {
        Ok(SignatureCheck::from_raw(String::new(), false))
    }

    fn resolve_commit(&self, _rev: &str) -> Result<String, ToolError> {
        Ok(COMMIT.to_string())
    }
}

fn store_trusting(key: &str) -> TrustStore {
    let mut store = TrustStore::empty();
    store.add_key(REPO, key).unwrap();
    store
}

fn verifier(tag_key: &'static str, trust: TrustStore) -> ProvenanceVerifier {
    ProvenanceVerifier::new(Arc::new(SignedTagRepo { tag_key }), Arc::new(trust))
}

#[test]
fn trusted_tag_signer_raises_no_warnings() {
    let record = verifier("ABCD1234", store_trusting("ABCD1234")).verify("v1.2.3", Some(REPO));

    assert_eq!(record.tag_type, TagType::Annotated);
    assert_eq!(record.tag_signature_status, SignatureStatus::Good);
    assert_eq!(record.tag_key_id.as_deref(), Some("ABCD1234"));
    assert_eq!(record.commit.as_deref(), Some(COMMIT));
    assert!(record.warnings.is_empty());
}

#[test]
fn untrusted_tag_signer_raises_one_warning_with_remediation() {
    let record = verifier("DEADBEEF", store_trusting("ABCD1234")).verify("v1.2.3", Some(REPO));

    assert_eq!(record.warnings.len(), 1);
    let warning = &record.warnings[0];
    assert_eq!(warning.subject, SignedObject::Tag);
    assert_eq!(warning.key_id, "DEADBEEF");
    assert!(warning.remediation.contains("DEADBEEF"));
    assert!(warning.to_string().contains("not trusted"));
}

#[test]
fn trust_is_matched_across_url_spellings() {
    let record = verifier("ABCD1234", store_trusting("abcd1234"))
        .verify("v1.2.3", Some("https://GitHub.com/example/wallet.git/"));
    assert!(record.warnings.is_empty());
}

#[test]
fn trusting_a_key_persists_and_clears_the_warning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trust.toml");

    let store = TrustStore::load(&path).unwrap();
    assert_eq!(store.revision(), 0);
    let record = verifier("DEADBEEF", store).verify("v1.2.3", Some(REPO));
    assert_eq!(record.warnings.len(), 1);

    let mut store = TrustStore::load(&path).unwrap();
    assert!(store.add_key(REPO, "DEADBEEF").unwrap());
    store.save(&path).unwrap();

    let reloaded = TrustStore::load(&path).unwrap();
    assert_eq!(reloaded.revision(), 1);
    assert!(reloaded.updated_at().is_some());
    let record = verifier("DEADBEEF", reloaded).verify("v1.2.3", Some(REPO));
    assert!(record.warnings.is_empty());
}

#[tokio::test]
async fn provenance_never_changes_the_verdict() {
    let dir = tempfile::tempdir().unwrap();
    for side in ["official", "built"] {
        fs::create_dir(dir.path().join(side)).unwrap();
        let file = File::create(dir.path().join(side).join("base.apk")).unwrap();
        let mut zip = ZipWriter::new(file);
        zip.start_file("classes.dex", SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"dex").unwrap();
        zip.finish().unwrap();
    }
    let source = PathArtifactSource::new(
        vec![dir.path().join("official")],
        vec![dir.path().join("built")],
    );
    let engine = VerificationEngine::new(
        EngineConfig::new(dir.path().join("work")),
        Arc::new(ZipArchiveReader),
    )
    .with_provenance(verifier("DEADBEEF", TrustStore::empty()));
    let request = VerificationRequest {
        metadata: ReportMetadata {
            app_id: "org.example.wallet".to_string(),
            version_name: "1.2.3".to_string(),
            version_code: "123".to_string(),
            ..ReportMetadata::default()
        },
        revision: Some("v1.2.3".to_string()),
        repo_url: Some(REPO.to_string()),
        ..VerificationRequest::default()
    };

    let report = engine.run(&source, &request).await.unwrap().report;

    assert_eq!(report.verdict, Verdict::Reproducible);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.commit, COMMIT);
    assert!(report
        .warnings
        .iter()
        .any(|w| matches!(w, ReportWarning::Trust(t) if t.key_id == "DEADBEEF")));
    assert!(report.warnings.iter().any(|w| matches!(
        w,
        ReportWarning::Signature {
            subject: SignedObject::Commit,
            status: SignatureStatus::Unsigned
        }
    )));
}
