//! The verification pipeline.
//!
//! acquire → normalize → decompose → diff → provenance → report, one run at
//! a time per workspace. Fatal conditions stop the run with a
//! [`VerifyError`]; everything recoverable becomes a [`RunWarning`] in the
//! report.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, warn, Instrument, Span};
use uuid::Uuid;

use crate::decompose::{ArchiveReader, Decomposer};
use crate::diff::{AbsentDirection, Classifier, DiffEngine, DiffResult, DEFAULT_MAX_CONCURRENT};
use crate::domain::{
    Artifact, Digest, Result, RunWarning, SetLayout, Side, Slice, SliceId, SliceSet, VerifyError,
};
use crate::normalize::{normalize_side, NormalizedArtifact, NormalizedSide};
use crate::obs;
use crate::provenance::{ProvenanceRecord, ProvenanceVerifier};
use crate::report::{aggregate, ReportMetadata, ReportWarning, VerificationReport};
use crate::source::ArtifactSource;
use crate::workspace::Workspace;

/// Slice preferred as the source of `appHash` for split families.
const BASE_SLICE: &str = "base";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Must not exist before the run.
    pub workspace_root: PathBuf,
    pub keep_workspace: bool,
    pub max_concurrent: usize,
    pub classifier: Classifier,
}

impl EngineConfig {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            keep_workspace: false,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            classifier: Classifier::default(),
        }
    }
}

/// What to verify.
#[derive(Debug, Clone, Default)]
pub struct VerificationRequest {
    /// Declared release facts; `metadata.app_id` is the declared app id.
    pub metadata: ReportMetadata,
    /// App id the artifacts must belong to, when known from a profile.
    pub expected_app_id: Option<String>,
    /// Tag or commit the release claims to be built from.
    pub revision: Option<String>,
    pub repo_url: Option<String>,
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub report: VerificationReport,
    /// Set when the workspace was kept for inspection.
    pub kept_workspace: Option<PathBuf>,
}

/// One side after decomposition.
struct DecomposedSide {
    set: SliceSet,
    warnings: Vec<RunWarning>,
    unreadable: Vec<SliceId>,
}

pub struct VerificationEngine {
    config: EngineConfig,
    decomposer: Decomposer,
    diff: DiffEngine,
    provenance: Option<ProvenanceVerifier>,
}

impl VerificationEngine {
    pub fn new(config: EngineConfig, reader: Arc<dyn ArchiveReader>) -> Self {
        let diff = DiffEngine::new(config.classifier.clone(), config.max_concurrent);
        Self {
            config,
            decomposer: Decomposer::new(reader),
            diff,
            provenance: None,
        }
    }

    pub fn with_provenance(mut self, verifier: ProvenanceVerifier) -> Self {
        self.provenance = Some(verifier);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the full pipeline.
    pub async fn run(
        &self,
        source: &dyn ArtifactSource,
        request: &VerificationRequest,
    ) -> Result<RunOutcome> {
        let run_id = Uuid::new_v4().to_string();
        let span = obs::run_span(&run_id);
        self.run_in_span(run_id, source, request)
            .instrument(span)
            .await
    }

    async fn run_in_span(
        &self,
        run_id: String,
        source: &dyn ArtifactSource,
        request: &VerificationRequest,
    ) -> Result<RunOutcome> {
        let start = Instant::now();
        let started_at = Utc::now();
        let declared = &request.metadata.app_id;
        if let Some(expected) = &request.expected_app_id {
            if expected != declared {
                return Err(VerifyError::UnexpectedAppId {
                    declared: declared.clone(),
                    expected: expected.clone(),
                });
            }
        }

        let workspace = Workspace::create(&self.config.workspace_root)?;
        let result = self.pipeline(&run_id, &workspace, source, request).await;

        let mut report = match result {
            Ok(report) => report,
            Err(e) => {
                if let Err(cleanup) = workspace.finish(self.config.keep_workspace) {
                    warn!(run_id = %run_id, error = %cleanup, "workspace cleanup failed");
                }
                return Err(e);
            }
        };

        let kept_workspace = match workspace.finish(self.config.keep_workspace) {
            Ok(kept) => kept,
            Err(e) => {
                let w = RunWarning::external_tool(format!("workspace cleanup failed: {e}"));
                obs::emit_run_warning(&run_id, &w);
                report.warnings.push(ReportWarning::Run(w));
                None
            }
        };

        obs::emit_run_finished(
            &run_id,
            start.elapsed().as_millis() as u64,
            report.verdict,
            report.warnings.len(),
        );
        Ok(RunOutcome {
            run_id,
            started_at,
            report,
            kept_workspace,
        })
    }

    /// Everything between workspace creation and cleanup.
    async fn pipeline(
        &self,
        run_id: &str,
        workspace: &Workspace,
        source: &dyn ArtifactSource,
        request: &VerificationRequest,
    ) -> Result<VerificationReport> {
        let official_paths = source
            .list_official()
            .map_err(|source| VerifyError::ArtifactListing {
                side: Side::Official.to_string(),
                source,
            })?;
        let built_paths = source
            .list_built()
            .map_err(|source| VerifyError::ArtifactListing {
                side: Side::Built.to_string(),
                source,
            })?;
        obs::emit_run_started(
            run_id,
            &request.metadata.app_id,
            official_paths.len(),
            built_paths.len(),
        );

        let official = normalize_side(Side::Official, &official_paths);
        let mut built = normalize_side(Side::Built, &built_paths);
        let mut warnings: Vec<RunWarning> = Vec::new();
        warnings.extend(official.warnings.iter().cloned());
        warnings.extend(built.warnings.iter().cloned());

        if official.artifacts.is_empty() {
            return Err(VerifyError::NoOfficialArtifacts);
        }
        if built.artifacts.is_empty() {
            warnings.push(RunWarning::configuration(
                "no built artifacts found; every official slice is reported absent",
            ));
        }

        let (o_layout, b_layout) = (
            SetLayout::of(&official.kinds()),
            SetLayout::of(&built.kinds()),
        );
        if o_layout.conflicts_with(b_layout) {
            return Err(VerifyError::LayoutMismatch {
                official: o_layout.to_string(),
                built: b_layout.to_string(),
            });
        }
        pair_lone_artifacts(&official, &mut built)?;

        let official_set = self
            .decompose_side(run_id, workspace, Side::Official, official.artifacts.clone())
            .await?;
        let built_set = self
            .decompose_side(run_id, workspace, Side::Built, built.artifacts.clone())
            .await?;
        warnings.extend(official_set.warnings);
        warnings.extend(built_set.warnings);

        let results = self
            .diff
            .compare_parallel(&official_set.set, &built_set.set)
            .await?;
        let results = keep_unreadable_slices(
            &official,
            results,
            &official_set.unreadable,
            &built_set.unreadable,
        );
        let substantive: usize = results.iter().map(DiffResult::substantive_count).sum();
        let absent = results.iter().filter(|r| r.is_absent()).count();
        obs::emit_diff_completed(run_id, results.len(), substantive, absent);

        let provenance = self.verify_provenance(request).await?;
        obs::emit_provenance_verified(run_id, &provenance);

        let mut metadata = request.metadata.clone();
        if metadata.app_hash.is_none() {
            match app_hash_artifact(&official_set.set) {
                Some(path) => match Digest::of_file(&path) {
                    Ok(d) => metadata.app_hash = Some(d.to_hex()),
                    Err(e) => warnings.push(RunWarning::external_tool(format!(
                        "could not hash {}: {e}",
                        path.display()
                    ))),
                },
                None => debug!("no readable official artifact to hash"),
            }
        }

        for w in &warnings {
            obs::emit_run_warning(run_id, w);
        }
        Ok(aggregate(results, provenance, metadata, warnings))
    }

    async fn decompose_side(
        &self,
        run_id: &str,
        workspace: &Workspace,
        side: Side,
        artifacts: Vec<NormalizedArtifact>,
    ) -> Result<DecomposedSide> {
        let decomposer = self.decomposer.clone();
        let dest_root = workspace.side_root(side);
        let run_id = run_id.to_string();
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let mut out = DecomposedSide {
                set: SliceSet::new(side),
                warnings: Vec::new(),
                unreadable: Vec::new(),
            };
            for normalized in artifacts {
                let artifact = Artifact::new(&normalized.path, side);
                match decomposer.decompose(&artifact, &normalized.id, &dest_root) {
                    Ok(tree) => {
                        obs::emit_slice_decomposed(&run_id, side, normalized.id.as_str(), tree.len());
                        let slice = Slice {
                            id: normalized.id,
                            source_path: normalized.path,
                            kind: normalized.kind,
                            tree: Arc::new(tree),
                        };
                        if let Err(dup) = out.set.insert(slice) {
                            out.warnings.push(RunWarning::configuration(dup.to_string()));
                        }
                    }
                    Err(e) => {
                        out.warnings.push(RunWarning::external_tool(format!(
                            "{side} artifact {} for slice '{}' could not be unpacked: {e}",
                            artifact.file_name(),
                            normalized.id
                        )));
                        out.unreadable.push(normalized.id);
                    }
                }
            }
            out
        })
        .await
        .map_err(|e| VerifyError::Worker(format!("{side} decomposition failed: {e}")))
    }

    async fn verify_provenance(&self, request: &VerificationRequest) -> Result<ProvenanceRecord> {
        let Some(revision) = request.revision.clone() else {
            return Ok(ProvenanceRecord::unavailable(
                "none",
                "no source revision given; provenance was not checked",
            ));
        };
        let Some(verifier) = self.provenance.clone() else {
            return Ok(ProvenanceRecord::unavailable(
                revision,
                "no source checkout given; provenance was not checked",
            ));
        };
        let repo_url = request.repo_url.clone();
        let span = Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            verifier.verify(&revision, repo_url.as_deref())
        })
        .await
        .map_err(|e| VerifyError::Worker(format!("provenance check failed: {e}")))
    }
}

/// Single-APK and firmware artifacts are named independently per side, and
/// a device pull of an app without splits yields a lone `base.apk`. When each
/// side is one such artifact, compare them under the official id. A lone
/// non-split artifact against any other lone split slice is a layout
/// mismatch.
fn pair_lone_artifacts(official: &NormalizedSide, built: &mut NormalizedSide) -> Result<()> {
    if !(official.is_single() || built.is_single()) {
        return Ok(());
    }
    if official.artifacts.len() != 1 || built.artifacts.len() != 1 {
        return Ok(());
    }
    let pairable = |side: &NormalizedSide| side.is_single() || side.is_lone_base();
    if !(pairable(official) && pairable(built)) {
        return Err(VerifyError::LayoutMismatch {
            official: SetLayout::of(&official.kinds()).to_string(),
            built: SetLayout::of(&built.kinds()).to_string(),
        });
    }

    let official_id = official.artifacts[0].id.clone();
    let only = &mut built.artifacts[0];
    if only.id != official_id {
        debug!(official = %official_id, built = %only.id, "pairing lone artifacts");
        only.id = official_id;
    }
    Ok(())
}

/// Re-insert slices that were unreadable on both sides as ABSENT, in
/// official order, so they are never silently dropped.
fn keep_unreadable_slices(
    official: &NormalizedSide,
    results: Vec<DiffResult>,
    official_unreadable: &[SliceId],
    built_unreadable: &[SliceId],
) -> Vec<DiffResult> {
    let built_unreadable: HashSet<&SliceId> = built_unreadable.iter().collect();
    let lost: HashSet<&SliceId> = official_unreadable
        .iter()
        .filter(|id| built_unreadable.contains(id))
        .collect();
    if lost.is_empty() {
        return results;
    }

    let mut ordered = Vec::with_capacity(results.len() + lost.len());
    let mut pending = results;
    for artifact in &official.artifacts {
        if lost.contains(&artifact.id) {
            ordered.push(DiffResult::absent(
                artifact.id.clone(),
                AbsentDirection::OfficialOnly,
            ));
        } else if let Some(pos) = pending.iter().position(|r| r.slice == artifact.id) {
            ordered.push(pending.remove(pos));
        }
    }
    // Whatever is left is built-only, already in built order.
    ordered.extend(pending);
    ordered
}

/// Artifact hashed for `appHash`: the base slice if present, else the first.
fn app_hash_artifact(official: &SliceSet) -> Option<PathBuf> {
    official
        .get(&SliceId::new(BASE_SLICE))
        .or_else(|| official.iter().next())
        .map(|s| s.source_path.clone())
}
