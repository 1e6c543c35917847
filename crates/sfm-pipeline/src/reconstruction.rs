//! Reconstruction with fallback.
//!
//! The primary strategy maps the retrieval pairs with the incremental mapper.
//! If it errors or registers no image, its correspondences are discarded and
//! the exhaustive fallback runs with permissive settings:
//!
//! ```text
//! Pending -> Primary -> Succeeded
//!                    \-> FallingBack -> Succeeded | Failed
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow, bail};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sfm_core::SparseModel;
use sfm_core::artifact::SFM;
use thiserror::Error;

use crate::error::StageError;
use crate::session::RunContext;
use crate::tools::{FallbackReconstructor, FallbackRequest, IncrementalMapper, MapperRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionPhase {
    Pending,
    Primary,
    FallingBack,
    Succeeded,
    Failed,
}

impl ReconstructionPhase {
    fn can_advance_to(self, next: ReconstructionPhase) -> bool {
        use ReconstructionPhase::*;
        matches!(
            (self, next),
            (Pending, Primary)
                | (Primary, Succeeded)
                | (Primary, FallingBack)
                | (FallingBack, Succeeded)
                | (FallingBack, Failed)
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal reconstruction transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: ReconstructionPhase,
    pub to: ReconstructionPhase,
}

/// Current phase plus every phase observed so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    history: Vec<ReconstructionPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self {
            history: vec![ReconstructionPhase::Pending],
        }
    }
}

impl PhaseTracker {
    pub fn current(&self) -> ReconstructionPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(ReconstructionPhase::Pending)
    }

    pub fn advance(&mut self, next: ReconstructionPhase) -> Result<(), IllegalTransition> {
        let from = self.current();
        if !from.can_advance_to(next) {
            return Err(IllegalTransition { from, to: next });
        }
        self.history.push(next);
        Ok(())
    }

    pub fn history(&self) -> &[ReconstructionPhase] {
        &self.history
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Primary,
    Fallback,
}

/// Outcome of the reconstruction stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReconstructionResult {
    Succeeded {
        model: SparseModel,
        strategy: Strategy,
        /// Primary failure the fallback recovered from.
        primary_error: Option<String>,
    },
    Failed {
        primary_error: String,
        fallback_error: String,
    },
}

impl ReconstructionResult {
    pub fn model(&self) -> Option<&SparseModel> {
        match self {
            ReconstructionResult::Succeeded { model, .. } => Some(model),
            ReconstructionResult::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.model().is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategies
// ─────────────────────────────────────────────────────────────────────────────

fn largest_model(root: &std::path::Path) -> Result<SparseModel> {
    SparseModel::find_best(root)?
        .ok_or_else(|| anyhow!("no sparse model found in {}", root.display()))
}

fn run_primary(ctx: &RunContext, mapper: &dyn IncrementalMapper) -> Result<SparseModel> {
    let sfm_dir = ctx.layout().sfm_dir.clone();
    fs::create_dir_all(&sfm_dir)
        .with_context(|| format!("failed to create {}", sfm_dir.display()))?;

    let pairs = ctx.require_pairs_path()?;
    let features = ctx.require_features()?;
    let matches = ctx.require_matches()?;
    let config = ctx.config();
    let request = MapperRequest {
        output_dir: &sfm_dir,
        image_dir: &config.image_dir,
        pairs: &pairs,
        features: &features,
        matches: &matches,
        image_list: ctx.require_images()?,
        camera_mode: config.mapper.camera_mode,
        options: &config.mapper,
    };
    let rendered: Vec<String> = config
        .mapper
        .to_key_values()
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    info!(
        "incremental mapping (camera mode {}): {}",
        config.mapper.camera_mode.as_str(),
        rendered.join(" ")
    );

    let written = mapper.reconstruct(&request)?;
    let model = largest_model(&written)?;
    if model.is_empty() {
        bail!("model at {} registered no images", model.path.display());
    }
    Ok(model)
}

fn run_fallback(ctx: &RunContext, fallback: &dyn FallbackReconstructor) -> Result<SparseModel> {
    // Primary correspondences, database included, must not leak into the retry.
    ctx.store().clean(SFM)?;
    let layout = ctx.layout();
    fs::create_dir_all(&layout.sfm_dir)
        .with_context(|| format!("failed to create {}", layout.sfm_dir.display()))?;

    let request = FallbackRequest {
        database: &layout.database,
        image_dir: &ctx.config().image_dir,
        output_dir: &layout.sfm_dir,
        options: &ctx.config().fallback,
    };
    let written = fallback.reconstruct(&request)?;
    let model = largest_model(&written)?;
    if model.is_empty() {
        bail!("model at {} registered no images", model.path.display());
    }
    Ok(model)
}

// ─────────────────────────────────────────────────────────────────────────────
// Step Function
// ─────────────────────────────────────────────────────────────────────────────

/// Reconstruct the scene, falling back to exhaustive matching if needed.
///
/// Strategy failures are not errors of this function: they end up in the
/// returned [`ReconstructionResult`] and in the run's error list. Only an
/// illegal phase transition is returned as an error.
pub fn step_reconstruction(
    ctx: &mut RunContext,
    mapper: &dyn IncrementalMapper,
    fallback: &dyn FallbackReconstructor,
) -> Result<ReconstructionResult> {
    let mut phases = PhaseTracker::default();
    let outcome = reconstruct(ctx, mapper, fallback, &mut phases);
    ctx.state.reconstruction_phases = phases.history().to_vec();
    let result = outcome?;

    match &result {
        ReconstructionResult::Succeeded {
            model,
            strategy,
            primary_error,
        } => {
            if let Some(err) = primary_error {
                ctx.record_error(err.clone());
            }
            info!(
                "{strategy:?} reconstruction registered {} images in {}",
                model.registered_images,
                model.path.display()
            );
        }
        ReconstructionResult::Failed {
            primary_error,
            fallback_error,
        } => {
            ctx.record_error(primary_error.clone());
            ctx.record_error(fallback_error.clone());
            ctx.log_failure("reconstruction fallback", fallback_error.clone());
        }
    }
    ctx.state.reconstruction = Some(result.clone());
    Ok(result)
}

fn reconstruct(
    ctx: &mut RunContext,
    mapper: &dyn IncrementalMapper,
    fallback: &dyn FallbackReconstructor,
    phases: &mut PhaseTracker,
) -> Result<ReconstructionResult> {
    phases.advance(ReconstructionPhase::Primary)?;
    let primary_error = match run_primary(ctx, mapper) {
        Ok(model) => {
            phases.advance(ReconstructionPhase::Succeeded)?;
            return Ok(ReconstructionResult::Succeeded {
                model,
                strategy: Strategy::Primary,
                primary_error: None,
            });
        }
        Err(err) => StageError::ReconstructionFailed(format!("{err:#}")).to_string(),
    };

    warn!("{primary_error}; falling back to exhaustive reconstruction");
    phases.advance(ReconstructionPhase::FallingBack)?;
    ctx.log_failure("reconstruction primary", primary_error.clone());

    match run_fallback(ctx, fallback) {
        Ok(model) => {
            phases.advance(ReconstructionPhase::Succeeded)?;
            ctx.log_success_with_notes(
                "reconstruction fallback",
                format!("{} registered images", model.registered_images),
            );
            Ok(ReconstructionResult::Succeeded {
                model,
                strategy: Strategy::Fallback,
                primary_error: Some(primary_error),
            })
        }
        Err(err) => {
            phases.advance(ReconstructionPhase::Failed)?;
            // A failed run leaves no reconstruction output behind.
            if let Err(clean_err) = ctx.store().clean(SFM) {
                let clean_err = anyhow::Error::new(clean_err)
                    .context("failed to discard the partial reconstruction");
                warn!("{clean_err:#}");
                ctx.record_error(format!("{clean_err:#}"));
            }
            Ok(ReconstructionResult::Failed {
                primary_error,
                fallback_error: StageError::FallbackFailed(format!("{err:#}")).to_string(),
            })
        }
    }
}

/// Model directory of a successful reconstruction.
pub fn require_model(ctx: &RunContext) -> Result<PathBuf> {
    ctx.state
        .reconstruction
        .as_ref()
        .and_then(ReconstructionResult::model)
        .map(|m| m.path.clone())
        .ok_or_else(|| anyhow!("a successful reconstruction is required before this stage"))
}
