//! Step functions for the linear stages of a run.
//!
//! Each step reads its inputs from the [`RunContext`], calls one collaborator,
//! verifies what the collaborator claims to have produced and stores the
//! result back into the context. Reconstruction lives in
//! [`crate::reconstruction`].

use anyhow::{Context, Result};
use log::{info, warn};
use sfm_core::artifact::{FEATURES, MATCHES, PAIRS, RANKINGS, UNDISTORTED};
use sfm_core::{ArtifactKind, list_images, select_pairs, verify_produced};

use crate::error::StageError;
use crate::reconstruction::require_model;
use crate::session::RunContext;
use crate::tools::{LocalFeatureExtractor, Matcher, ModelAnalyzer, Rectifier, RetrievalExtractor};

/// Prefix of the statistics text when the analyzer fails.
pub const ANALYZER_ERROR_PREFIX: &str = "Error running model analyzer";

// ─────────────────────────────────────────────────────────────────────────────
// Step Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Catalog the input images, describe each globally and rank its most
/// similar neighbours.
pub fn step_retrieval(ctx: &mut RunContext, retrieval: &dyn RetrievalExtractor) -> Result<()> {
    let config = ctx.config();
    let images = list_images(&config.image_dir)?;
    let descriptors = retrieval
        .extract(
            &config.image_dir,
            &ctx.layout().retrieval,
            &config.retrieval,
        )
        .context("global descriptor extraction failed")?;
    verify_produced(&descriptors, ArtifactKind::File)?;

    let rankings = retrieval
        .rank(
            &descriptors,
            &ctx.layout().rankings,
            config.retrieval.num_matched,
        )
        .context("image ranking failed")?;
    ctx.store().verify(RANKINGS)?;
    info!(
        "ranked {} images (K = {})",
        rankings.len(),
        config.retrieval.num_matched
    );

    ctx.state.images = Some(images);
    ctx.state.retrieval = Some(descriptors);
    ctx.state.rankings = Some(rankings);
    Ok(())
}

/// Turn the rankings into a deduplicated pair list and persist it.
pub fn step_pairs(ctx: &mut RunContext) -> Result<()> {
    let images = ctx.require_images()?;
    let rankings = ctx
        .state
        .rankings
        .as_ref()
        .context("retrieval required before pair selection")?;

    let pairs = select_pairs(images, rankings, ctx.config().retrieval.num_matched)?;
    if pairs.is_empty() {
        warn!("retrieval produced no usable pair for {} images", images.len());
    }
    let path = ctx.store().require(PAIRS)?.path.clone();
    pairs.write(&path)?;
    ctx.store().verify(PAIRS)?;

    let notes = format!("{} pairs from {} images", pairs.len(), images.len());
    info!("{notes}");
    ctx.log_success_with_notes("pairs", notes);
    ctx.state.pairs = Some(pairs);
    ctx.state.pairs_path = Some(path);
    Ok(())
}

/// Extract local features for every image.
pub fn step_features(ctx: &mut RunContext, extractor: &dyn LocalFeatureExtractor) -> Result<()> {
    let config = ctx.config();
    info!(
        "extracting {} features (resize_max = {})",
        config.features.conf, config.features.resize_max
    );
    let features = extractor
        .extract(&config.image_dir, &ctx.layout().features, &config.features)
        .context("local feature extraction failed")?;
    verify_produced(&features, ArtifactKind::File)
        .with_context(|| format!("{FEATURES} archive was not produced"))?;

    ctx.state.features = Some(features);
    Ok(())
}

/// Match features across the selected pairs.
pub fn step_matching(ctx: &mut RunContext, matcher: &dyn Matcher) -> Result<()> {
    let pairs = ctx.require_pairs_path()?;
    let features = ctx.require_features()?;
    let matches = matcher
        .match_pairs(
            &pairs,
            &features,
            &ctx.layout().matches,
            &ctx.config().matcher,
        )
        .context("feature matching failed")?;
    verify_produced(&matches, ArtifactKind::File)
        .with_context(|| format!("{MATCHES} archive was not produced"))?;

    ctx.state.matches = Some(matches);
    Ok(())
}

/// Rectify the input images against the reconstructed cameras.
///
/// Requires a successful reconstruction. A rectifier that exits cleanly
/// without producing its output directory is a failure too.
pub fn step_undistortion(ctx: &mut RunContext, rectifier: &dyn Rectifier) -> Result<()> {
    let model = require_model(ctx)?;
    ctx.store().clean(UNDISTORTED)?;

    let output = ctx.layout().undistorted.clone();
    let config = ctx.config();
    rectifier
        .undistort(&config.image_dir, &model, &output, &config.undistort)
        .map_err(|err| StageError::UndistortionFailed(format!("{err:#}")))?;
    ctx.store()
        .verify(UNDISTORTED)
        .map_err(|err| StageError::UndistortionFailed(err.to_string()))?;

    info!("undistorted images written to {}", output.display());
    ctx.state.undistorted = Some(output);
    Ok(())
}

/// Summarize the reconstructed model.
///
/// An analyzer failure is not an error of the run: it becomes the
/// statistics text.
pub fn step_statistics(ctx: &mut RunContext, analyzer: &dyn ModelAnalyzer) -> Result<()> {
    let model = require_model(ctx)?;
    let text = match analyzer.analyze(&model) {
        Ok(text) => text,
        Err(err) => {
            let text = format!("{ANALYZER_ERROR_PREFIX}: {err:#}");
            warn!("{text}");
            ctx.record_error(text.clone());
            text
        }
    };
    ctx.state.model_statistics = Some(text);
    Ok(())
}
