//! Structured lifecycle events for a bump pass.
//!
//! - `pass_span`: span tagging everything logged during a pass, including the
//!   per-repository pipelines, with its id
//! - `emit_*`: one event per pass start/finish and per stage outcome
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::{info, warn};

use crate::domain::Stage;

/// Span for one pass. Attach it to the pass future with
/// [`tracing::Instrument`]; spawned pipelines carry it on explicitly.
///
/// ```ignore
/// engine.pass(id).instrument(pass_span(&id)).await
/// ```
pub fn pass_span(pass_id: &str) -> tracing::Span {
    tracing::info_span!("modbump.pass", pass_id = %pass_id)
}

pub fn emit_pass_started(pass_id: &str, repositories: usize, workers: usize) {
    info!(
        event = "pass.started",
        pass_id = %pass_id,
        repositories = repositories,
        workers = workers,
    );
}

pub fn emit_stage_completed(repo: &str, stage: Stage) {
    info!(event = "stage.completed", repo = %repo, stage = %stage);
}

/// Stage failures are warnings: the pass keeps going for other repositories.
pub fn emit_stage_failed(repo: &str, stage: Stage, error: &dyn std::fmt::Display) {
    warn!(event = "stage.failed", repo = %repo, stage = %stage, error = %error);
}

/// Emit event: pass finished with per-outcome counts.
pub fn emit_pass_finished(
    pass_id: &str,
    duration_ms: u64,
    completed: usize,
    failed: usize,
    saved: usize,
) {
    info!(
        event = "pass.finished",
        pass_id = %pass_id,
        duration_ms = duration_ms,
        completed = completed,
        failed = failed,
        saved = saved,
        success = failed == 0,
    );
}
