//! Structured observability hooks for the run lifecycle.
//!
//! This module provides:
//! - Run-scoped tracing spans via [`run_span`]
//! - Emission functions for lifecycle events: run start, block start and
//!   finish, run finish, watch trigger and watch errors

use tracing::{debug, info, warn};

use crate::document::BlockId;
use crate::error::WatcherError;
use crate::result::{RunSummary, TestResult, TestStatus};

/// Run-scoped span. Attach with `tracing::Instrument::instrument` so it
/// follows the run future across worker threads.
///
/// ```ignore
/// executor.run(documents).instrument(run_span(&run_id)).await
/// ```
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("doctest.run", run_id = %run_id)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, blocks: usize, max_workers: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        blocks = blocks,
        max_workers = max_workers
    );
}

/// Emit event: a block began executing.
pub fn emit_block_started(block: &BlockId, language: &str) {
    debug!(event = "block.started", block = %block, language = %language);
}

/// Emit event: a block reached a terminal status.
pub fn emit_block_finished(result: &TestResult) {
    match result.status {
        TestStatus::Failed => {
            let message = result
                .error
                .as_ref()
                .map(|e| e.message.as_str())
                .unwrap_or("");
            warn!(
                event = "block.failed",
                block = %result.block,
                language = %result.language,
                duration_ms = result.duration_ms,
                error = %message,
            );
        }
        status => {
            debug!(
                event = "block.finished",
                block = %result.block,
                status = %status,
                duration_ms = result.duration_ms,
            );
        }
    }
}

/// Emit event: run finished with counts and duration.
pub fn emit_run_finished(summary: &RunSummary) {
    info!(
        event = "run.finished",
        run_id = %summary.run_id,
        total = summary.total,
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        duration_ms = summary.duration_ms,
    );
}

/// Emit event: a watched file changed and triggered a run.
pub fn emit_watch_triggered(path: &str) {
    info!(event = "watch.triggered", path = %path);
}

/// Emit event: filesystem observation failed (warning level).
pub fn emit_watch_error(error: &WatcherError) {
    warn!(event = "watch.error", error = %error);
}
