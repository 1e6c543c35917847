//! The pipeline orchestrator.
//!
//! Stages run in a fixed order, each wrapped in the stage timer:
//! Retrieval, Pair Selection, Feature Extraction, Matching, Reconstruction
//! (with its internal fallback), Undistortion, Model Statistics. Whatever
//! happens, exactly one report is written when the run ends.

use std::ops::{Deref, DerefMut};
use std::thread;

use anyhow::Result;
use log::error;
use sfm_core::Stage;

use crate::reconstruction::step_reconstruction;
use crate::report::{RunReport, write_report};
use crate::session::RunContext;
use crate::steps::{
    step_features, step_matching, step_pairs, step_retrieval, step_statistics, step_undistortion,
};
use crate::tools::Toolchain;

/// Writes the run report exactly once.
///
/// [`ReportGuard::finish`] writes the report and returns it. If the guard is
/// dropped without `finish` (early return or panic), the drop writes an
/// aborted-run report instead.
pub struct ReportGuard<'a> {
    ctx: &'a mut RunContext,
    written: bool,
}

impl<'a> ReportGuard<'a> {
    pub fn new(ctx: &'a mut RunContext) -> Self {
        Self {
            ctx,
            written: false,
        }
    }

    pub fn finish(mut self) -> Result<RunReport> {
        self.written = true;
        write_report(self.ctx)
    }
}

impl Deref for ReportGuard<'_> {
    type Target = RunContext;

    fn deref(&self) -> &RunContext {
        self.ctx
    }
}

impl DerefMut for ReportGuard<'_> {
    fn deref_mut(&mut self) -> &mut RunContext {
        self.ctx
    }
}

impl Drop for ReportGuard<'_> {
    fn drop(&mut self) {
        if self.written {
            return;
        }
        let reason = if thread::panicking() {
            "run aborted by a panic"
        } else {
            "run aborted before completion"
        };
        error!("{reason}");
        self.ctx.record_error(reason);
        if let Err(err) = write_report(self.ctx) {
            error!("failed to write report: {err:#}");
        }
    }
}

/// Run every stage against `ctx` and write the report.
///
/// Stage failures never escape: they are recorded in the report, and the
/// call returns `Ok` once the report is on disk. The only error is a report
/// that could not be written.
///
/// The output directory must not be shared with a concurrent run.
pub fn run_pipeline(ctx: &mut RunContext, tools: &Toolchain) -> Result<RunReport> {
    let mut guard = ReportGuard::new(ctx);
    if let Err(err) = execute(&mut guard, tools) {
        error!("pipeline stopped: {err:#}");
        guard.record_error(format!("{err:#}"));
    }
    guard.finish()
}

fn execute(ctx: &mut RunContext, tools: &Toolchain) -> Result<()> {
    ctx.prepare()?;

    ctx.time_stage(Stage::Retrieval, |ctx| {
        step_retrieval(ctx, tools.retrieval.as_ref())
    })?;
    ctx.time_stage(Stage::PairSelection, step_pairs)?;
    ctx.time_stage(Stage::FeatureExtraction, |ctx| {
        step_features(ctx, tools.features.as_ref())
    })?;
    ctx.time_stage(Stage::Matching, |ctx| {
        step_matching(ctx, tools.matcher.as_ref())
    })?;

    let result = ctx.time_stage(Stage::Reconstruction, |ctx| {
        step_reconstruction(ctx, tools.mapper.as_ref(), tools.fallback.as_ref())
    })?;
    if !result.is_success() {
        error!("no usable model; skipping undistortion and statistics");
        return Ok(());
    }

    ctx.time_stage(Stage::Undistortion, |ctx| {
        step_undistortion(ctx, tools.rectifier.as_ref())
    })?;
    ctx.time_stage(Stage::ModelStatistics, |ctx| {
        step_statistics(ctx, tools.analyzer.as_ref())
    })?;
    Ok(())
}
