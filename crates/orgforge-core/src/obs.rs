//! Structured observability hooks for provisioning runs.
//!
//! - Run-scoped tracing spans via [`run_span`] and the [`RunSpan`] guard
//! - Emission functions for lifecycle events: run start/finish, phase and
//!   stage completion, cleanup and backup failures
//!
//! Events are emitted at `info!` level, failures that do not fail the run at
//! `warn!`. Filtering follows `RUST_LOG`.

use tracing::{info, warn, Span};

/// Span tagged with `run_id`.
///
/// Attach it to async work with `tracing::Instrument::instrument`.
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("orgforge.run", run_id = %run_id)
}

/// RAII guard that enters the run span for synchronous sections.
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345");
/// // tracing calls here carry run_id = "run-12345"
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, top_level_ous: usize, regions: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        top_level_ous = top_level_ous,
        regions = regions,
    );
}

/// Emit event: run finished with duration and outcome.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        success = success,
    );
}

pub fn emit_phase_finished(run_id: &str, phase: &str, duration_ms: u64) {
    info!(
        event = "phase.finished",
        run_id = %run_id,
        phase = %phase,
        duration_ms = duration_ms,
    );
}

/// Emit event: one landing-zone stage finished.
pub fn emit_stage_finished(run_id: &str, stage: &str, resources: usize, success: bool) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        resources = resources,
        success = success,
    );
}

/// Emit event: an inverse action failed while unwinding (warning level).
pub fn emit_cleanup_failed(run_id: &str, action: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cleanup.failed", run_id = %run_id, action = %action, error = %error);
}

/// Emit event: the asynchronous backup after a save failed (warning level).
pub fn emit_backup_failed(backup_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "state.backup_failed", backup_id = %backup_id, error = %error);
}
