//! End-to-end runs of the verification engine over zip fixtures.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rbv_core::{
    AbsentDirection, DiffOutcome, DisplayOptions, EngineConfig, PathArtifactSource,
    ReportMetadata, ReportWarning, TagType, Verdict, VerificationEngine, VerificationRequest,
    VerifyError, WarningKind, ZipArchiveReader,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

fn write_apk(path: &Path, entries: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut zip = ZipWriter::new(file);
    for (name, body) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(body.as_bytes()).unwrap();
    }
    zip.finish().unwrap();
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("official")).unwrap();
        fs::create_dir(dir.path().join("built")).unwrap();
        Self { dir }
    }

    fn official(&self, name: &str, entries: &[(&str, &str)]) {
        write_apk(&self.dir.path().join("official").join(name), entries);
    }

    fn built(&self, name: &str, entries: &[(&str, &str)]) {
        write_apk(&self.dir.path().join("built").join(name), entries);
    }

    fn source(&self) -> PathArtifactSource {
        PathArtifactSource::new(
            vec![self.dir.path().join("official")],
            vec![self.dir.path().join("built")],
        )
    }

    fn workspace(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn engine(&self) -> VerificationEngine {
        VerificationEngine::new(
            EngineConfig::new(self.workspace()),
            Arc::new(ZipArchiveReader),
        )
    }
}

fn request() -> VerificationRequest {
    VerificationRequest {
        metadata: ReportMetadata {
            app_id: "org.example.wallet".to_string(),
            version_name: "1.2.3".to_string(),
            version_code: "123".to_string(),
            ..ReportMetadata::default()
        },
        ..VerificationRequest::default()
    }
}

#[tokio::test]
async fn signing_metadata_differences_are_reproducible() {
    let fx = Fixture::new();
    fx.official(
        "base.apk",
        &[("classes.dex", "dex"), ("META-INF/CERT.SF", "official-sig")],
    );
    fx.built(
        "base.apk",
        &[("classes.dex", "dex"), ("META-INF/CERT.SF", "rebuilt-sig")],
    );

    let outcome = fx.engine().run(&fx.source(), &request()).await.unwrap();
    let report = &outcome.report;

    assert_eq!(report.verdict, Verdict::Reproducible);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.substantive_paths, 0);
    assert_eq!(report.signature_noise_paths, 1);
    assert_eq!(report.app_id, "org.example.wallet");
    assert_eq!(report.apk_version_name, "1.2.3");
    assert_eq!(report.apk_version_code, "123");
    assert_eq!(report.app_hash.len(), 64);
    assert!(outcome.kept_workspace.is_none());
    assert!(!fx.workspace().exists(), "workspace must be removed");
}

#[tokio::test]
async fn missing_built_split_is_absent_official_only() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "dex")]);
    fx.official("split_config.x86_64.apk", &[("lib/x86_64/libapp.so", "so")]);
    fx.built("base.apk", &[("classes.dex", "dex")]);

    let report = fx.engine().run(&fx.source(), &request()).await.unwrap().report;

    assert_eq!(report.verdict, Verdict::DifferencesFound);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.absent_slices, 1);
    let absent: Vec<_> = report.diff.iter().filter(|r| r.is_absent()).collect();
    assert_eq!(absent.len(), 1);
    assert_eq!(absent[0].slice.as_str(), "x86_64");
    assert_eq!(
        absent[0].outcome,
        DiffOutcome::Absent {
            direction: AbsentDirection::OfficialOnly
        }
    );
}

#[tokio::test]
async fn bundletool_and_device_names_are_matched() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "dex")]);
    fx.official("split_config.arm64_v8a.apk", &[("lib/arm64/libapp.so", "so")]);
    fx.built("base-master.apk", &[("classes.dex", "dex")]);
    fx.built("base-arm64_v8a.apk", &[("lib/arm64/libapp.so", "so")]);

    let report = fx.engine().run(&fx.source(), &request()).await.unwrap().report;

    assert_eq!(report.verdict, Verdict::Reproducible);
    let slices: Vec<&str> = report.diff.iter().map(|r| r.slice.as_str()).collect();
    assert_eq!(slices, vec!["base", "arm64_v8a"]);
}

#[tokio::test]
async fn substantive_change_is_listed_in_text_report() {
    let fx = Fixture::new();
    fx.official("app-release.apk", &[("classes.dex", "v1"), ("res/a.xml", "a")]);
    fx.built("app-unsigned.apk", &[("classes.dex", "v2"), ("res/a.xml", "a")]);

    let report = fx.engine().run(&fx.source(), &request()).await.unwrap().report;

    assert_eq!(report.verdict, Verdict::DifferencesFound);
    assert_eq!(report.substantive_paths, 1);
    assert_eq!(report.diff[0].slice.as_str(), "app-release");

    let text = report.render_text(&DisplayOptions::default());
    assert!(text.contains("verdict:        differences found"));
    assert!(text.contains("    ~ classes.dex"));
    assert!(!text.contains("res/a.xml"));
}

#[tokio::test]
async fn single_against_split_is_an_identity_mismatch() {
    let fx = Fixture::new();
    fx.official("app-release.apk", &[("classes.dex", "dex")]);
    fx.built("base.apk", &[("classes.dex", "dex")]);
    fx.built("split_config.en.apk", &[("res/en.arsc", "en")]);

    let err = fx.engine().run(&fx.source(), &request()).await.unwrap_err();

    assert!(matches!(err, VerifyError::LayoutMismatch { .. }), "{err}");
    assert_eq!(err.exit_code(), 2);
    assert!(!fx.workspace().exists());
}

#[tokio::test]
async fn gradle_apk_is_compared_against_bundletool_base() {
    let fx = Fixture::new();
    fx.official("app-release.apk", &[("classes.dex", "dex")]);
    fx.built("base-master.apk", &[("classes.dex", "dex")]);

    let report = fx.engine().run(&fx.source(), &request()).await.unwrap().report;

    assert_eq!(report.verdict, Verdict::Reproducible);
    assert_eq!(report.absent_slices, 0);
    assert_eq!(report.diff.len(), 1);
    assert_eq!(report.diff[0].slice.as_str(), "app-release");
    assert_eq!(report.diff[0].outcome, DiffOutcome::Matched);
}

#[tokio::test]
async fn device_base_is_compared_against_gradle_apk() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "v1")]);
    fx.built("app-release-unsigned.apk", &[("classes.dex", "v2")]);

    let report = fx.engine().run(&fx.source(), &request()).await.unwrap().report;

    assert_eq!(report.diff.len(), 1);
    assert_eq!(report.diff[0].slice.as_str(), "base");
    assert_eq!(report.absent_slices, 0);
    assert_eq!(report.substantive_paths, 1);
}

#[tokio::test]
async fn single_against_lone_config_split_is_an_identity_mismatch() {
    let fx = Fixture::new();
    fx.official("app-release.apk", &[("classes.dex", "dex")]);
    fx.built("split_config.en.apk", &[("res/en.arsc", "en")]);

    let err = fx.engine().run(&fx.source(), &request()).await.unwrap_err();

    assert!(matches!(err, VerifyError::LayoutMismatch { .. }), "{err}");
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn existing_workspace_is_refused_and_left_alone() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "dex")]);
    fx.built("base.apk", &[("classes.dex", "dex")]);
    fs::create_dir(fx.workspace()).unwrap();
    fs::write(fx.workspace().join("stale.txt"), "keep me").unwrap();

    let err = fx.engine().run(&fx.source(), &request()).await.unwrap_err();

    assert!(matches!(err, VerifyError::WorkspaceConflict { .. }));
    assert_eq!(err.exit_code(), 3);
    assert_eq!(
        fs::read_to_string(fx.workspace().join("stale.txt")).unwrap(),
        "keep me"
    );
}

#[tokio::test]
async fn declared_app_id_must_match_profile() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "dex")]);

    let mut req = request();
    req.expected_app_id = Some("org.example.other".to_string());
    let err = fx.engine().run(&fx.source(), &req).await.unwrap_err();

    assert!(matches!(err, VerifyError::UnexpectedAppId { .. }));
    assert_eq!(err.exit_code(), 2);
    assert!(!fx.workspace().exists(), "nothing is created before identity passes");
}

#[tokio::test]
async fn no_official_artifacts_is_fatal() {
    let fx = Fixture::new();
    fx.built("base.apk", &[("classes.dex", "dex")]);

    let err = fx.engine().run(&fx.source(), &request()).await.unwrap_err();

    assert!(matches!(err, VerifyError::NoOfficialArtifacts));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn unreadable_built_archive_becomes_warning_and_absence() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "dex")]);
    fs::write(fx.dir.path().join("built").join("base.apk"), b"not a zip").unwrap();

    let report = fx.engine().run(&fx.source(), &request()).await.unwrap().report;

    assert_eq!(report.verdict, Verdict::DifferencesFound);
    assert_eq!(
        report.diff[0].outcome,
        DiffOutcome::Absent {
            direction: AbsentDirection::OfficialOnly
        }
    );
    let tool_warnings = report
        .warnings
        .iter()
        .filter(|w| matches!(w, ReportWarning::Run(r) if r.kind == WarningKind::ExternalTool))
        .count();
    assert_eq!(tool_warnings, 1);
}

#[tokio::test]
async fn kept_workspace_holds_unpacked_content() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "dex")]);
    fx.built("base.apk", &[("classes.dex", "dex")]);

    let mut config = EngineConfig::new(fx.workspace());
    config.keep_workspace = true;
    let engine = VerificationEngine::new(config, Arc::new(ZipArchiveReader));
    let outcome = engine.run(&fx.source(), &request()).await.unwrap();

    let kept = outcome.kept_workspace.expect("workspace kept");
    assert_eq!(
        fs::read_to_string(kept.join("official/base/classes.dex")).unwrap(),
        "dex"
    );
    assert!(kept.join("built/base/classes.dex").is_file());
}

#[tokio::test]
async fn provenance_without_checkout_is_reported_unavailable() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "dex")]);
    fx.built("base.apk", &[("classes.dex", "dex")]);

    let mut req = request();
    req.revision = Some("v1.2.3".to_string());
    req.metadata.commit = Some("abc123".to_string());
    let report = fx.engine().run(&fx.source(), &req).await.unwrap().report;

    assert_eq!(report.verdict, Verdict::Reproducible);
    assert_eq!(report.provenance.revision, "v1.2.3");
    assert_eq!(report.provenance.tag_type, TagType::Unresolved);
    assert_eq!(report.commit, "abc123");
    assert!(!report.notes.is_empty());
}

#[tokio::test]
async fn repeated_runs_produce_identical_reports() {
    let fx = Fixture::new();
    fx.official("base.apk", &[("classes.dex", "v1"), ("META-INF/CERT.SF", "a")]);
    fx.official("split_config.en.apk", &[("res/en.arsc", "en")]);
    fx.official("split_config.de.apk", &[("res/de.arsc", "de")]);
    fx.built("base.apk", &[("classes.dex", "v2"), ("META-INF/CERT.SF", "b")]);
    fx.built("split_config.en.apk", &[("res/en.arsc", "en")]);

    let first = fx.engine().run(&fx.source(), &request()).await.unwrap();
    let second = fx.engine().run(&fx.source(), &request()).await.unwrap();

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(
        first.report.to_json().unwrap(),
        second.report.to_json().unwrap()
    );
    let opts = DisplayOptions::default();
    assert_eq!(
        first.report.render_text(&opts),
        second.report.render_text(&opts)
    );
}
