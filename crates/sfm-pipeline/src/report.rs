//! Run report: Markdown timing table plus model statistics, with a JSON twin.
//!
//! Reports accumulate in the stats directory, one pair of files per run:
//! `timing_stats_<YYYYmmdd_HHMMSS>.md` and `run_report_<YYYYmmdd_HHMMSS>.json`.
//! A run finishing within the same second as an earlier one gets a `_<n>`
//! suffix on its timestamp instead of overwriting it.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use sfm_core::StageTiming;
use sfm_core::timing::TOTAL;

use crate::reconstruction::ReconstructionResult;
use crate::session::{LogEntry, RunContext, RunMetadata};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// What the report says about the reconstructed model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum ModelSection {
    /// The run failed before a pair list existed; no section is written.
    Omitted,
    /// Analyzer output, or the captured analyzer error.
    Statistics(String),
    /// No statistics were produced; carries the reason.
    Unavailable(String),
}

/// Immutable snapshot of a finished (or aborted) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp: String,
    pub metadata: RunMetadata,
    /// Stage rows in execution order, the total excluded.
    pub stages: Vec<StageTiming>,
    /// Measured end-to-end seconds.
    pub total_s: f64,
    pub reconstruction: Option<ReconstructionResult>,
    pub model_statistics: ModelSection,
    pub errors: Vec<String>,
    pub log: Vec<LogEntry>,
    pub markdown_path: PathBuf,
    pub json_path: PathBuf,
}

impl RunReport {
    /// Snapshot `ctx`, stopping its run clock.
    pub fn from_context(ctx: &mut RunContext, timestamp: impl Into<String>) -> Self {
        let timestamp = timestamp.into();
        let total = ctx.timing.finish();
        let stats_dir = &ctx.layout().stats_dir;
        let markdown_path = stats_dir.join(markdown_name(&timestamp));
        let json_path = stats_dir.join(json_name(&timestamp));

        Self {
            metadata: ctx.metadata.clone(),
            stages: ctx.timing.stages().to_vec(),
            total_s: total.as_secs_f64(),
            reconstruction: ctx.state.reconstruction.clone(),
            model_statistics: model_section(ctx),
            errors: ctx.state.errors.clone(),
            log: ctx.log.clone(),
            markdown_path,
            json_path,
            timestamp,
        }
    }

    /// Render the Markdown report.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Pipeline Statistics - {}\n", self.timestamp);
        out.push_str("## Timing Information\n\n");
        out.push_str("| Step | Time (seconds) |\n");
        out.push_str("|------|----------------|\n");
        for stage in &self.stages {
            let _ = writeln!(out, "| {} | {:.2} |", stage.label, stage.elapsed_s);
        }
        let _ = writeln!(out, "| **{TOTAL}** | **{:.2}** |\n", self.total_s);

        match &self.model_statistics {
            ModelSection::Omitted => {}
            ModelSection::Statistics(text) | ModelSection::Unavailable(text) => {
                out.push_str("## Model Statistics\n\n");
                let _ = writeln!(out, "```\n{text}\n```\n");
            }
        }

        if !self.errors.is_empty() {
            out.push_str("## Errors\n\n");
            for err in &self.errors {
                let _ = writeln!(out, "- {}", err.replace('\n', " "));
            }
        }
        out
    }

    /// Write the Markdown report and its JSON twin.
    pub fn write(&self) -> Result<()> {
        if let Some(dir) = self.markdown_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create stats directory {}", dir.display()))?;
        }
        fs::write(&self.markdown_path, self.to_markdown())
            .with_context(|| format!("failed to write {}", self.markdown_path.display()))?;

        let json = serde_json::to_string_pretty(self).context("failed to serialize run report")?;
        fs::write(&self.json_path, json)
            .with_context(|| format!("failed to write {}", self.json_path.display()))?;

        info!("report written to {}", self.markdown_path.display());
        Ok(())
    }
}

fn markdown_name(timestamp: &str) -> String {
    format!("timing_stats_{timestamp}.md")
}

fn json_name(timestamp: &str) -> String {
    format!("run_report_{timestamp}.json")
}

/// `base`, or `base_<n>` for the first `n` not used by an earlier report.
fn unused_timestamp(stats_dir: &Path, base: &str) -> String {
    let taken = |stamp: &str| {
        stats_dir.join(markdown_name(stamp)).exists() || stats_dir.join(json_name(stamp)).exists()
    };
    let mut stamp = base.to_string();
    let mut n = 0u32;
    while taken(&stamp) {
        n += 1;
        stamp = format!("{base}_{n}");
    }
    stamp
}

fn model_section(ctx: &RunContext) -> ModelSection {
    if ctx.state.pairs.is_none() {
        return ModelSection::Omitted;
    }
    if let Some(text) = &ctx.state.model_statistics {
        return ModelSection::Statistics(text.clone());
    }
    let reason = ctx
        .state
        .errors
        .last()
        .map(String::as_str)
        .unwrap_or("no model statistics were produced");
    ModelSection::Unavailable(format!("Error during processing: {reason}"))
}

/// Snapshot `ctx` under the current local time and write the report.
pub fn write_report(ctx: &mut RunContext) -> Result<RunReport> {
    let now = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
    let timestamp = unused_timestamp(&ctx.layout().stats_dir, &now);
    let report = RunReport::from_context(ctx, timestamp);
    report.write()?;
    Ok(report)
}
