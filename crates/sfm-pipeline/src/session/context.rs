//! Run context container with mutable state.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result, anyhow};
use log::{info, warn};
use serde::Serialize;
use sfm_core::{ArtifactLayout, ArtifactStore, PairList, Rankings, RunConfig, Stage, TimingRecord};

use crate::reconstruction::{ReconstructionPhase, ReconstructionResult};

use super::types::{LogEntry, RunMetadata};

/// Intermediate results, filled in stage by stage.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunState {
    /// Image catalog of the input directory.
    pub images: Option<Vec<String>>,
    /// Global descriptor archive.
    pub retrieval: Option<PathBuf>,
    pub rankings: Option<Rankings>,
    pub pairs: Option<PairList>,
    /// Persisted pair list.
    pub pairs_path: Option<PathBuf>,
    /// Local feature archive.
    pub features: Option<PathBuf>,
    pub matches: Option<PathBuf>,
    /// Observed reconstruction phases, `Pending` first.
    pub reconstruction_phases: Vec<ReconstructionPhase>,
    pub reconstruction: Option<ReconstructionResult>,
    pub undistorted: Option<PathBuf>,
    /// Analyzer output, or the captured analyzer error.
    pub model_statistics: Option<String>,
    /// Every error recorded during the run, in order.
    pub errors: Vec<String>,
}

/// Mutable state container for one pipeline run.
///
/// The configuration is validated on construction and read-only afterwards.
#[derive(Debug)]
pub struct RunContext {
    pub metadata: RunMetadata,

    config: RunConfig,

    layout: ArtifactLayout,

    store: ArtifactStore,

    /// Per-stage durations and the end-to-end clock.
    pub timing: TimingRecord,

    pub state: RunState,

    /// Operation log (lightweight audit trail).
    pub log: Vec<LogEntry>,
}

impl RunContext {
    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate `config`, create the output directory and start the run clock.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!(
                "failed to create output directory {}",
                config.output_dir.display()
            )
        })?;

        let layout = ArtifactLayout::from_config(&config);
        let store = ArtifactStore::from_layout(&layout);
        Ok(Self {
            metadata: RunMetadata::new(),
            config,
            layout,
            store,
            timing: TimingRecord::start(),
            state: RunState::default(),
            log: Vec::new(),
        })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Remove stale artifacts of a previous run before any stage starts.
    ///
    /// # Errors
    ///
    /// Returns the first `CleanupError`; the run must not continue.
    pub fn prepare(&mut self) -> Result<()> {
        let removed = self
            .store
            .clean_all()
            .context("failed to remove stale artifacts")?;
        let notes = if removed.is_empty() {
            "no stale artifacts".to_string()
        } else {
            let names: Vec<&str> = removed.iter().map(|a| a.name.as_str()).collect();
            format!("removed stale {}", names.join(", "))
        };
        info!("{notes}");
        self.log_success_with_notes("prepare", notes);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stage Timing
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `body` as `stage`, recording its duration whether it succeeds or not.
    ///
    /// The body's error wins over a timing error.
    pub fn time_stage<T>(
        &mut self,
        stage: Stage,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let label = stage.label();
        info!("{label}: started");
        let start = Instant::now();
        let result = body(self);
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                info!("{label}: done in {:.2}s", elapsed.as_secs_f64());
                self.log_success(label);
            }
            Err(err) => {
                warn!("{label}: failed after {:.2}s: {err:#}", elapsed.as_secs_f64());
                self.log_failure(label, format!("{err:#}"));
            }
        }

        self.timing.record_outcome(label, elapsed, result)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State Access
    // ─────────────────────────────────────────────────────────────────────────

    pub fn require_images(&self) -> Result<&[String]> {
        self.state
            .images
            .as_deref()
            .ok_or_else(|| anyhow!("image catalog not loaded"))
    }

    pub fn require_pairs_path(&self) -> Result<PathBuf> {
        self.state
            .pairs_path
            .clone()
            .ok_or_else(|| anyhow!("pair selection required before this stage"))
    }

    pub fn require_features(&self) -> Result<PathBuf> {
        self.state
            .features
            .clone()
            .ok_or_else(|| anyhow!("feature extraction required before this stage"))
    }

    pub fn require_matches(&self) -> Result<PathBuf> {
        self.state
            .matches
            .clone()
            .ok_or_else(|| anyhow!("matching required before this stage"))
    }

    /// Remember an error for the report.
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.state.errors.push(error.into());
        self.metadata.touch();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    pub fn log_success(&mut self, operation: impl Into<String>) {
        self.log.push(LogEntry::success(operation));
        self.metadata.touch();
    }

    pub fn log_success_with_notes(
        &mut self,
        operation: impl Into<String>,
        notes: impl Into<String>,
    ) {
        self.log.push(LogEntry::success_with_notes(operation, notes));
        self.metadata.touch();
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.log.push(LogEntry::failure(operation, error));
        self.metadata.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use tempfile::tempdir;

    fn context(dir: &std::path::Path) -> RunContext {
        RunContext::new(RunConfig::new(dir.join("images"), dir.join("outputs"))).unwrap()
    }

    #[test]
    fn new_creates_output_dir_and_rejects_bad_config() {
        let dir = tempdir().unwrap();
        let ctx = context(dir.path());
        assert!(ctx.config().output_dir.is_dir());
        assert_eq!(ctx.layout().sfm_dir, dir.path().join("outputs").join("sfm"));

        let mut config = RunConfig::new(dir.path().join("images"), dir.path().join("o2"));
        config.retrieval.num_matched = 0;
        assert!(RunContext::new(config).is_err());
    }

    #[test]
    fn artifact_names_cannot_reach_outside_the_output_dir() {
        let dir = tempdir().unwrap();
        let images = dir.path().join("images");
        fs::create_dir(&images).unwrap();
        fs::write(images.join("a.jpg"), b"jpeg").unwrap();

        let mut config = RunConfig::new(&images, dir.path().join("outputs"));
        config.artifacts.undistorted = "..".to_string();
        let err = RunContext::new(config).unwrap_err();
        assert!(err.to_string().contains("artifacts.undistorted"), "{err}");
        assert!(images.join("a.jpg").is_file());
    }

    #[test]
    fn prepare_removes_stale_artifacts() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());
        let features = ctx.layout().features.clone();
        fs::write(&features, b"stale").unwrap();
        fs::create_dir_all(ctx.layout().sfm_dir.join("0")).unwrap();

        ctx.prepare().unwrap();
        assert!(!features.exists());
        assert!(!ctx.layout().sfm_dir.exists());
        let notes = ctx.log[0].notes.as_deref().unwrap();
        assert!(notes.contains("features"), "{notes}");
    }

    #[test]
    fn failed_stage_is_timed_and_logged() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());

        let result: Result<()> = ctx.time_stage(Stage::Matching, |_| bail!("matcher crashed"));
        assert!(result.is_err());
        assert!(ctx.timing.contains("Feature Matching"));
        let entry = ctx.log.last().unwrap();
        assert!(!entry.success);
        assert_eq!(entry.notes.as_deref(), Some("matcher crashed"));
    }

    #[test]
    fn stage_cannot_be_timed_twice() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());

        ctx.time_stage(Stage::Retrieval, |_| Ok(())).unwrap();
        let err = ctx.time_stage(Stage::Retrieval, |_| Ok(())).unwrap_err();
        assert!(err.to_string().contains("already timed"), "{err}");
    }

    #[test]
    fn body_can_update_state() {
        let dir = tempdir().unwrap();
        let mut ctx = context(dir.path());

        ctx.time_stage(Stage::PairSelection, |ctx| {
            ctx.state.images = Some(vec!["a.jpg".to_string()]);
            Ok(())
        })
        .unwrap();
        assert_eq!(ctx.require_images().unwrap(), ["a.jpg".to_string()]);
        assert!(ctx.require_features().is_err());
    }
}
