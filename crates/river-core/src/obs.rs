//! Structured lifecycle events.
//!
//! Every helper logs at `info!` (or `warn!`/`error!` for degraded outcomes)
//! with an `event` field so JSON log consumers can filter on it.

use std::path::Path;

use river_plugin::{Capability, HookName, ResultCounts, TestResult};
use tracing::{error, info, warn};

pub fn emit_stage_started(stage: &str) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_finished(stage: &str, outcome: &str) {
    info!(event = "stage.finished", stage = %stage, outcome = %outcome);
}

pub fn emit_hook_dispatched(capability: Capability, hook: HookName, plugins: usize) {
    info!(
        event = "hook.dispatched",
        capability = %capability,
        hook = %hook,
        plugins = plugins,
    );
}

/// Per-test comparison outcome; mismatches and missing dumps log as errors.
pub fn emit_compare_result(test: &str, result: TestResult, detail: &str) {
    match result {
        TestResult::Passed => info!(event = "compare.result", test = %test, result = %result, "{detail}"),
        TestResult::Failed => error!(event = "compare.result", test = %test, result = %result, "{detail}"),
        TestResult::Unavailable => {
            error!(event = "compare.result", test = %test, result = %result, "{detail}")
        }
    }
}

pub fn emit_report_written(path: &Path, counts: &ResultCounts) {
    info!(
        event = "report.written",
        path = %path.display(),
        total = counts.total,
        passed = counts.passed,
        failed = counts.failed,
        unavailable = counts.unavailable,
    );
}

pub fn emit_incomplete(reason: &str) {
    warn!(event = "run.incomplete", reason = %reason);
}
