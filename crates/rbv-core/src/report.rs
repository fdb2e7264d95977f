//! Verdict aggregation and report rendering.
//!
//! [`aggregate`] is a pure function: the same diff results, provenance and
//! metadata always give the same report, and both renderings are
//! byte-identical across runs (no timestamps, stable ordering).

use std::fmt;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::diff::{Classification, DiffOutcome, DiffResult, PathChange, Verdict};
use crate::domain::RunWarning;
use crate::provenance::{ProvenanceRecord, SignatureStatus, SignedObject, TagType, TrustWarning};

pub const BEGIN_MARKER: &str = "===== Begin Results =====";
pub const END_MARKER: &str = "===== End Results =====";

/// Default number of distinct differing paths shown in the text preview.
pub const DEFAULT_PREVIEW_PATHS: usize = 50;

const UNKNOWN: &str = "unknown";

/// Caller-supplied facts about the release under verification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetadata {
    pub app_id: String,
    pub signer: Option<String>,
    pub version_name: String,
    pub version_code: String,
    pub app_hash: Option<String>,
    /// Used when the signature tool cannot resolve the revision.
    pub commit: Option<String>,
}

/// One line of the report's `Also:` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "kebab-case")]
pub enum ReportWarning {
    Signature {
        subject: SignedObject,
        status: SignatureStatus,
    },
    Trust(TrustWarning),
    Run(RunWarning),
}

impl fmt::Display for ReportWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportWarning::Signature { subject, status } => {
                write!(f, "{subject} signature is {status}")
            }
            ReportWarning::Trust(w) => write!(f, "{w}"),
            ReportWarning::Run(w) => write!(f, "{w}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub app_id: String,
    pub signer: String,
    pub apk_version_name: String,
    pub apk_version_code: String,
    pub verdict: Verdict,
    pub app_hash: String,
    pub commit: String,
    pub substantive_paths: usize,
    pub signature_noise_paths: usize,
    pub absent_slices: usize,
    /// Every slice, official order first, then built-only extras.
    pub diff: Vec<DiffResult>,
    pub provenance: ProvenanceRecord,
    pub warnings: Vec<ReportWarning>,
    pub notes: Vec<String>,
}

/// Combine diff and provenance into the final report.
///
/// The verdict comes from the diff results alone; provenance only adds
/// warnings.
pub fn aggregate(
    diff: Vec<DiffResult>,
    provenance: ProvenanceRecord,
    metadata: ReportMetadata,
    run_warnings: Vec<RunWarning>,
) -> VerificationReport {
    let verdict = Verdict::from_results(&diff);
    let substantive_paths = diff.iter().map(DiffResult::substantive_count).sum();
    let signature_noise_paths = diff.iter().map(DiffResult::noise_count).sum();
    let absent_slices = diff.iter().filter(|r| r.is_absent()).count();

    let mut warnings = Vec::new();
    if provenance.tag_type == TagType::Annotated && is_advisory(provenance.tag_signature_status) {
        warnings.push(ReportWarning::Signature {
            subject: SignedObject::Tag,
            status: provenance.tag_signature_status,
        });
    }
    if is_advisory(provenance.commit_signature_status) {
        warnings.push(ReportWarning::Signature {
            subject: SignedObject::Commit,
            status: provenance.commit_signature_status,
        });
    }
    warnings.extend(provenance.warnings.iter().cloned().map(ReportWarning::Trust));
    warnings.extend(run_warnings.into_iter().map(ReportWarning::Run));

    let commit = provenance
        .commit
        .clone()
        .or(metadata.commit)
        .unwrap_or_else(|| UNKNOWN.to_string());

    VerificationReport {
        app_id: metadata.app_id,
        signer: metadata.signer.unwrap_or_else(|| UNKNOWN.to_string()),
        apk_version_name: metadata.version_name,
        apk_version_code: metadata.version_code,
        verdict,
        app_hash: metadata.app_hash.unwrap_or_else(|| UNKNOWN.to_string()),
        commit,
        substantive_paths,
        signature_noise_paths,
        absent_slices,
        diff,
        notes: provenance.notes.clone(),
        provenance,
        warnings,
    }
}

fn is_advisory(status: SignatureStatus) -> bool {
    matches!(
        status,
        SignatureStatus::Bad | SignatureStatus::Unsigned | SignatureStatus::MissingKey
    )
}

/// Text rendering knobs.
#[derive(Debug, Clone)]
pub struct DisplayOptions {
    /// Distinct differing paths shown before truncating.
    pub max_paths: usize,
    /// Where the complete diff can be found, if anywhere.
    pub full_diff_pointer: Option<String>,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            max_paths: DEFAULT_PREVIEW_PATHS,
            full_diff_pointer: None,
        }
    }
}

impl VerificationReport {
    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render the human-readable report.
    pub fn render_text(&self, opts: &DisplayOptions) -> String {
        let mut out = String::new();
        let p = &self.provenance;

        // Writing to a String cannot fail.
        let _ = writeln!(out, "{BEGIN_MARKER}");
        let _ = writeln!(out, "appId:          {}", self.app_id);
        let _ = writeln!(out, "signer:         {}", self.signer);
        let _ = writeln!(out, "apkVersionName: {}", self.apk_version_name);
        let _ = writeln!(out, "apkVersionCode: {}", self.apk_version_code);
        let _ = writeln!(out, "verdict:        {}", self.verdict);
        let _ = writeln!(out, "appHash:        {}", self.app_hash);
        let _ = writeln!(out, "commit:         {}", self.commit);

        out.push_str("\nDiff:\n");
        self.render_diff(&mut out, opts);

        out.push_str("\nRevision, tag (and its signature):\n");
        let _ = writeln!(out, "{}", p.revision);
        match &p.tag_output {
            Some(raw) if !raw.trim().is_empty() => {
                for line in raw.lines() {
                    let _ = writeln!(out, "  {line}");
                }
            }
            _ => out.push_str("  (no tag signature output)\n"),
        }
        for note in &self.notes {
            let _ = writeln!(out, "  note: {note}");
        }

        out.push_str("\nSignature Summary:\n");
        let _ = writeln!(out, "Tag type: {}", p.tag_type);
        let _ = writeln!(
            out,
            "Tag signature: {}",
            status_line(p.tag_signature_status, p.tag_key_id.as_deref())
        );
        let _ = writeln!(
            out,
            "Commit signature: {}",
            status_line(p.commit_signature_status, p.commit_key_id.as_deref())
        );

        if !self.warnings.is_empty() {
            out.push_str("\nAlso:\n");
            for w in &self.warnings {
                let _ = writeln!(out, "- {w}");
            }
        }

        let _ = writeln!(out, "{END_MARKER}");
        out
    }

    fn render_diff(&self, out: &mut String, opts: &DisplayOptions) {
        let _ = writeln!(
            out,
            "{} substantive path(s), {} signature-only path(s), {} absent slice(s)",
            self.substantive_paths, self.signature_noise_paths, self.absent_slices
        );

        let mut shown = 0usize;
        let mut hidden = 0usize;
        for result in &self.diff {
            match &result.outcome {
                DiffOutcome::Matched => {
                    let _ = writeln!(out, "  {}: matched", result.slice);
                }
                DiffOutcome::Absent { direction } => {
                    let _ = writeln!(out, "  {}: absent ({direction})", result.slice);
                }
                DiffOutcome::Differing { paths } => {
                    let _ = writeln!(
                        out,
                        "  {}: differing ({} substantive, {} signature-only)",
                        result.slice,
                        result.substantive_count(),
                        result.noise_count()
                    );
                    for path in paths {
                        if shown >= opts.max_paths {
                            hidden += 1;
                            continue;
                        }
                        shown += 1;
                        let marker = match path.change {
                            PathChange::ContentDiffers => '~',
                            PathChange::OnlyInOfficial => '-',
                            PathChange::OnlyInBuilt => '+',
                        };
                        let suffix = match path.classification {
                            Classification::SignatureNoise => " (signing metadata)",
                            Classification::Substantive => "",
                        };
                        let _ = writeln!(out, "    {marker} {}{suffix}", path.path);
                    }
                }
            }
        }

        if hidden > 0 {
            let _ = writeln!(out, "  ... and {hidden} more differing path(s)");
            if let Some(pointer) = &opts.full_diff_pointer {
                let _ = writeln!(out, "  Full diff: {pointer}");
            }
        }
    }
}

fn status_line(status: SignatureStatus, key: Option<&str>) -> String {
    match (status, key) {
        (SignatureStatus::Unavailable, _) => "no signature information available".to_string(),
        (status, Some(key)) => format!("{status} (key {key})"),
        (status, None) => status.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{AbsentDirection, DifferingPath};
    use crate::domain::SliceId;

    fn provenance() -> ProvenanceRecord {
        ProvenanceRecord {
            revision: "v1.2.3".to_string(),
            commit: Some("c0ffee".to_string()),
            tag_type: TagType::Annotated,
            tag_signature_status: SignatureStatus::Good,
            commit_signature_status: SignatureStatus::Unsigned,
            tag_key_id: Some("ABCD1234".to_string()),
            commit_key_id: None,
            tag_output: Some("[GNUPG:] GOODSIG ABCD1234 Release Signer".to_string()),
            warnings: Vec::new(),
            notes: Vec::new(),
        }
    }

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            app_id: "com.example.wallet".to_string(),
            signer: Some("aa:bb".to_string()),
            version_name: "1.2.3".to_string(),
            version_code: "42".to_string(),
            app_hash: Some("deadbeef".to_string()),
            commit: Some("from-caller".to_string()),
        }
    }

    fn path(p: &str, change: PathChange, classification: Classification) -> DifferingPath {
        DifferingPath {
            path: p.to_string(),
            change,
            classification,
        }
    }

    fn differing(n: usize) -> DiffResult {
        let paths = (0..n)
            .map(|i| {
                path(
                    &format!("res/file{i:03}.xml"),
                    PathChange::ContentDiffers,
                    Classification::Substantive,
                )
            })
            .collect();
        DiffResult::from_paths(SliceId::new("base"), paths)
    }

    #[test]
    fn unsigned_commit_does_not_change_verdict() {
        let diff = vec![DiffResult::from_paths(
            SliceId::new("base"),
            vec![path(
                "META-INF/CERT.SF",
                PathChange::ContentDiffers,
                Classification::SignatureNoise,
            )],
        )];
        let report = aggregate(diff, provenance(), metadata(), Vec::new());
        assert_eq!(report.verdict, Verdict::Reproducible);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(
            report.warnings,
            vec![ReportWarning::Signature {
                subject: SignedObject::Commit,
                status: SignatureStatus::Unsigned,
            }]
        );
        assert_eq!(report.commit, "c0ffee");
    }

    #[test]
    fn text_report_has_every_block() {
        let diff = vec![
            DiffResult::from_paths(SliceId::new("base"), Vec::new()),
            DiffResult::absent(SliceId::new("x86_64"), AbsentDirection::OfficialOnly),
        ];
        let report = aggregate(
            diff,
            provenance(),
            metadata(),
            vec![RunWarning::configuration("identifier collision")],
        );
        let text = report.render_text(&DisplayOptions::default());

        assert!(text.starts_with(BEGIN_MARKER));
        assert!(text.trim_end().ends_with(END_MARKER));
        assert!(text.contains("verdict:        differences found"));
        assert!(text.contains("apkVersionCode: 42"));
        assert!(text.contains("\nDiff:\n"));
        assert!(text.contains("  x86_64: absent (official-only)"));
        assert!(text.contains("\nRevision, tag (and its signature):\nv1.2.3\n"));
        assert!(text.contains("Tag type: annotated"));
        assert!(text.contains("Tag signature: good (key ABCD1234)"));
        assert!(text.contains("Commit signature: unsigned"));
        assert!(text.contains("\nAlso:\n- commit signature is unsigned\n"));
        assert!(text.contains("- configuration warning: identifier collision"));
    }

    #[test]
    fn preview_is_bounded_by_distinct_paths() {
        let report = aggregate(vec![differing(60)], provenance(), metadata(), Vec::new());
        let opts = DisplayOptions {
            max_paths: 50,
            full_diff_pointer: Some("report.json".to_string()),
        };
        let text = report.render_text(&opts);
        assert_eq!(text.matches("    ~ res/file").count(), 50);
        assert!(text.contains("  ... and 10 more differing path(s)"));
        assert!(text.contains("  Full diff: report.json"));

        // The machine-readable report keeps everything.
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["diff"][0]["paths"].as_array().unwrap().len(), 60);
        assert_eq!(json["substantivePaths"], 60);
    }

    #[test]
    fn rendering_is_deterministic() {
        let build = || {
            aggregate(
                vec![differing(3), DiffResult::absent(SliceId::new("de"), AbsentDirection::BuiltOnly)],
                provenance(),
                metadata(),
                vec![RunWarning::external_tool("unreadable archive")],
            )
        };
        let (a, b) = (build(), build());
        assert_eq!(a, b);
        let opts = DisplayOptions::default();
        assert_eq!(a.render_text(&opts), b.render_text(&opts));
        assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    }

    #[test]
    fn json_uses_report_field_names() {
        let report = aggregate(Vec::new(), provenance(), metadata(), Vec::new());
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        for key in ["appId", "signer", "apkVersionName", "apkVersionCode", "verdict", "appHash", "commit"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["verdict"], "reproducible");
        assert_eq!(json["warnings"][0]["category"], "signature");
    }

    #[test]
    fn missing_metadata_falls_back_to_unknown() {
        let mut prov = provenance();
        prov.commit = None;
        let report = aggregate(
            Vec::new(),
            prov,
            ReportMetadata {
                app_id: "x".to_string(),
                ..Default::default()
            },
            Vec::new(),
        );
        assert_eq!(report.signer, "unknown");
        assert_eq!(report.app_hash, "unknown");
        assert_eq!(report.commit, "unknown");
    }
}
