//! Collaborator interfaces for the delegated stages.
//!
//! The orchestrator never extracts, matches or maps anything itself. Each of
//! those jobs sits behind a trait so production runs can drive the external
//! toolboxes while tests plug in in-memory fakes.

use std::path::{Path, PathBuf};

use anyhow::Result;
use sfm_core::{
    CameraMode, FallbackOptions, FeatureConfig, MapperOptions, MatcherConfig, Rankings,
    RetrievalConfig, UndistortConfig,
};

pub mod colmap;
pub mod hloc;
pub mod process;

pub use colmap::ColmapTools;
pub use hloc::HlocTools;
pub use process::run_tool;

/// Global-descriptor extraction and image ranking.
pub trait RetrievalExtractor {
    /// Describe every image of `image_dir`, writing the archive to `output`.
    ///
    /// Returns the path of the written archive.
    fn extract(&self, image_dir: &Path, output: &Path, config: &RetrievalConfig)
    -> Result<PathBuf>;

    /// Rank, for each image, its `k` most similar other images.
    ///
    /// The ranking is persisted to `output` as `query neighbour` lines.
    fn rank(&self, descriptors: &Path, output: &Path, k: usize) -> Result<Rankings>;
}

/// Local keypoint and descriptor extraction.
pub trait LocalFeatureExtractor {
    /// Returns the path of the written feature archive.
    fn extract(&self, image_dir: &Path, output: &Path, config: &FeatureConfig) -> Result<PathBuf>;
}

/// Pairwise matching with geometric verification.
pub trait Matcher {
    /// Returns the path of the written match archive.
    fn match_pairs(
        &self,
        pairs: &Path,
        features: &Path,
        output: &Path,
        config: &MatcherConfig,
    ) -> Result<PathBuf>;
}

/// Everything the incremental mapper consumes.
#[derive(Debug, Clone, Copy)]
pub struct MapperRequest<'a> {
    /// Model directory; the mapper may also keep its database here.
    pub output_dir: &'a Path,
    pub image_dir: &'a Path,
    pub pairs: &'a Path,
    pub features: &'a Path,
    pub matches: &'a Path,
    /// Images to register, by file name relative to `image_dir`.
    pub image_list: &'a [String],
    pub camera_mode: CameraMode,
    pub options: &'a MapperOptions,
}

/// Incremental pose and structure estimation from precomputed matches.
pub trait IncrementalMapper {
    /// Returns the directory the sparse model was written to.
    fn reconstruct(&self, request: &MapperRequest<'_>) -> Result<PathBuf>;
}

/// Inputs of the exhaustive fallback reconstruction.
#[derive(Debug, Clone, Copy)]
pub struct FallbackRequest<'a> {
    /// Correspondence database to create.
    pub database: &'a Path,
    pub image_dir: &'a Path,
    /// Root below which numbered models are written.
    pub output_dir: &'a Path,
    pub options: &'a FallbackOptions,
}

/// Exhaustive matching plus a permissive mapper, independent of retrieval.
pub trait FallbackReconstructor {
    /// Returns the root below which the models were written.
    fn reconstruct(&self, request: &FallbackRequest<'_>) -> Result<PathBuf>;
}

/// Image rectification against a recovered camera model.
pub trait Rectifier {
    fn undistort(
        &self,
        image_dir: &Path,
        model: &Path,
        output: &Path,
        config: &UndistortConfig,
    ) -> Result<()>;
}

/// Textual summary of a sparse model.
pub trait ModelAnalyzer {
    fn analyze(&self, model: &Path) -> Result<String>;
}

/// The collaborators handed to the orchestrator.
pub struct Toolchain {
    pub retrieval: Box<dyn RetrievalExtractor>,
    pub features: Box<dyn LocalFeatureExtractor>,
    pub matcher: Box<dyn Matcher>,
    pub mapper: Box<dyn IncrementalMapper>,
    pub fallback: Box<dyn FallbackReconstructor>,
    pub rectifier: Box<dyn Rectifier>,
    pub analyzer: Box<dyn ModelAnalyzer>,
}

impl Toolchain {
    /// hloc through `python` for the learned stages, the `colmap` binary for
    /// the fallback, rectification and statistics.
    pub fn external(python: impl Into<PathBuf>, colmap: impl Into<PathBuf>) -> Self {
        let hloc = HlocTools::new(python);
        let colmap = ColmapTools::new(colmap);
        Self {
            retrieval: Box::new(hloc.clone()),
            features: Box::new(hloc.clone()),
            matcher: Box::new(hloc.clone()),
            mapper: Box::new(hloc),
            fallback: Box::new(colmap.clone()),
            rectifier: Box::new(colmap.clone()),
            analyzer: Box::new(colmap),
        }
    }
}
