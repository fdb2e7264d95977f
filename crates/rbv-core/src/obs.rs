//! Structured lifecycle events for verification runs.
//!
//! Every event carries `event = "<name>"` and the run id, so a run can be
//! followed through JSON logs with a single filter.

use tracing::{info, warn, Span};

use crate::diff::Verdict;
use crate::domain::{RunWarning, Side};
use crate::provenance::ProvenanceRecord;

/// Span tagging everything logged during one run.
///
/// Attach it with `tracing::Instrument` so it stays correct across awaits.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("rbv.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, app_id: &str, official: usize, built: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        app_id = %app_id,
        official_artifacts = official,
        built_artifacts = built,
    );
}

pub fn emit_slice_decomposed(run_id: &str, side: Side, slice: &str, files: usize) {
    info!(event = "slice.decomposed", run_id = %run_id, side = %side, slice = %slice, files = files);
}

/// Emit event: diff finished over all slices.
pub fn emit_diff_completed(run_id: &str, slices: usize, substantive: usize, absent: usize) {
    info!(
        event = "diff.completed",
        run_id = %run_id,
        slices = slices,
        substantive_paths = substantive,
        absent_slices = absent,
    );
}

pub fn emit_provenance_verified(run_id: &str, record: &ProvenanceRecord) {
    info!(
        event = "provenance.verified",
        run_id = %run_id,
        revision = %record.revision,
        tag_type = %record.tag_type,
        tag_signature = %record.tag_signature_status,
        commit_signature = %record.commit_signature_status,
        trust_warnings = record.warnings.len(),
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, verdict: Verdict, warnings: usize) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        verdict = %verdict,
        warnings = warnings,
    );
}

/// Emit event: a recovered condition (warning level).
pub fn emit_run_warning(run_id: &str, warning: &RunWarning) {
    warn!(event = "run.warning", run_id = %run_id, kind = %warning.kind, message = %warning.message);
}
