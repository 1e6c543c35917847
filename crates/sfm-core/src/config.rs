//! Run configuration.
//!
//! A `RunConfig` is created once at the start of a run and never mutated
//! afterwards. Every tunable has a default taken from the reference runs, so
//! a JSON file only needs to name what differs:
//!
//! ```json
//! {
//!   "image_dir": "scene/images",
//!   "output_dir": "scene/outputs",
//!   "retrieval": { "num_matched": 50 },
//!   "features": { "resize_max": 512 }
//! }
//! ```

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err(ConfigError::Invalid(format!($($arg)+)));
        }
    };
}

/// Camera sharing assumption handed to the incremental mapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraMode {
    #[default]
    Auto,
    Single,
    PerFolder,
    PerImage,
}

impl CameraMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CameraMode::Auto => "AUTO",
            CameraMode::Single => "SINGLE",
            CameraMode::PerFolder => "PER_FOLDER",
            CameraMode::PerImage => "PER_IMAGE",
        }
    }
}

/// Global-descriptor retrieval settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Name of the global-descriptor configuration.
    pub conf: String,
    /// Number of most similar images kept per image (K).
    pub num_matched: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            conf: "netvlad".to_string(),
            num_matched: 25,
        }
    }
}

/// Local-feature extraction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Name of the local-feature configuration.
    pub conf: String,
    /// Longest image side after resizing, in pixels.
    pub resize_max: u32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            conf: "aliked-n16".to_string(),
            resize_max: 320,
        }
    }
}

/// Pairwise matcher and geometric-verification thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Name of the matcher configuration.
    pub conf: String,
    /// Maximum reprojection error in pixels.
    pub max_error: f64,
    pub confidence: f64,
    pub min_inlier_ratio: f64,
    pub min_num_inliers: u32,
    pub max_num_trials: u32,
    pub max_epipolar_error: f64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            conf: "aliked+lightglue".to_string(),
            max_error: 4.0,
            confidence: 0.999,
            min_inlier_ratio: 0.15,
            min_num_inliers: 15,
            max_num_trials: 10_000,
            max_epipolar_error: 4.0,
        }
    }
}

/// Options for the primary incremental mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperOptions {
    pub camera_mode: CameraMode,
    pub min_num_matches: u32,
    pub max_num_trials: u32,
    pub max_error: f64,
    pub init_min_num_inliers: u32,
    pub abs_pose_min_num_inliers: u32,
    pub abs_pose_min_inlier_ratio: f64,
    pub ba_local_max_num_iterations: u32,
    pub ba_global_max_num_iterations: u32,
    pub min_tri_angle: f64,
    pub min_model_size: u32,
    pub multiple_models: bool,
    /// Mapper worker threads; tool default when `None`.
    pub num_threads: Option<u32>,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            camera_mode: CameraMode::Auto,
            min_num_matches: 15,
            max_num_trials: 20_000,
            max_error: 4.0,
            init_min_num_inliers: 25,
            abs_pose_min_num_inliers: 25,
            abs_pose_min_inlier_ratio: 0.25,
            ba_local_max_num_iterations: 50,
            ba_global_max_num_iterations: 100,
            min_tri_angle: 3.0,
            min_model_size: 3,
            multiple_models: false,
            num_threads: None,
        }
    }
}

impl MapperOptions {
    /// Options as `key=value` strings, in a stable order.
    ///
    /// The camera mode is not a mapper option and is left out.
    pub fn to_key_values(&self) -> Vec<(&'static str, String)> {
        let mut kv = vec![
            ("min_num_matches", self.min_num_matches.to_string()),
            ("max_num_trials", self.max_num_trials.to_string()),
            ("max_error", self.max_error.to_string()),
            ("init_min_num_inliers", self.init_min_num_inliers.to_string()),
            (
                "abs_pose_min_num_inliers",
                self.abs_pose_min_num_inliers.to_string(),
            ),
            (
                "abs_pose_min_inlier_ratio",
                self.abs_pose_min_inlier_ratio.to_string(),
            ),
            (
                "ba_local_max_num_iterations",
                self.ba_local_max_num_iterations.to_string(),
            ),
            (
                "ba_global_max_num_iterations",
                self.ba_global_max_num_iterations.to_string(),
            ),
            ("min_tri_angle", self.min_tri_angle.to_string()),
            ("min_model_size", self.min_model_size.to_string()),
            ("multiple_models", u8::from(self.multiple_models).to_string()),
        ];
        if let Some(threads) = self.num_threads {
            kv.push(("num_threads", threads.to_string()));
        }
        kv
    }
}

/// Permissive settings for the exhaustive fallback reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackOptions {
    /// Assume all images share one camera.
    pub single_camera: bool,
    pub camera_model: String,
    /// Initial camera parameters, comma separated (e.g. `"2048,1024,512"`).
    pub camera_params: Option<String>,
    pub init_min_tri_angle: f64,
    pub ba_global_images_ratio: f64,
    pub ba_global_points_ratio: f64,
    pub filter_max_reproj_error: f64,
    pub min_num_matches: u32,
    pub abs_pose_min_num_inliers: u32,
    pub abs_pose_min_inlier_ratio: f64,
    pub abs_pose_max_error: f64,
    pub filter_min_tri_angle: f64,
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            single_camera: true,
            camera_model: "SIMPLE_RADIAL".to_string(),
            camera_params: None,
            init_min_tri_angle: 4.0,
            ba_global_images_ratio: 1.1,
            ba_global_points_ratio: 1.1,
            filter_max_reproj_error: 4.0,
            min_num_matches: 15,
            abs_pose_min_num_inliers: 15,
            abs_pose_min_inlier_ratio: 0.15,
            abs_pose_max_error: 12.0,
            filter_min_tri_angle: 1.5,
        }
    }
}

/// Image rectification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortConfig {
    /// Longest side of the rectified images, in pixels.
    pub max_image_size: u32,
    /// Output layout understood by downstream consumers.
    pub output_type: String,
}

impl Default for UndistortConfig {
    fn default() -> Self {
        Self {
            max_image_size: 1024,
            output_type: "COLMAP".to_string(),
        }
    }
}

/// File and directory names of the artifacts below the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactNames {
    pub retrieval: String,
    pub rankings: String,
    pub pairs: String,
    pub features: String,
    pub matches: String,
    pub sfm: String,
    /// Database file name inside the `sfm` directory.
    pub database: String,
    pub undistorted: String,
    pub stats: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            retrieval: "global-feats-netvlad.h5".to_string(),
            rankings: "retrieval-ranks.txt".to_string(),
            pairs: "pairs-sfm.txt".to_string(),
            features: "feats-aliked-n16.h5".to_string(),
            matches: "matches-aliked-lightglue.h5".to_string(),
            sfm: "sfm".to_string(),
            database: "database.db".to_string(),
            undistorted: "undistorted".to_string(),
            stats: "stats".to_string(),
        }
    }
}

impl ArtifactNames {
    fn all(&self) -> [(&'static str, &str); 9] {
        [
            ("retrieval", &self.retrieval),
            ("rankings", &self.rankings),
            ("pairs", &self.pairs),
            ("features", &self.features),
            ("matches", &self.matches),
            ("sfm", &self.sfm),
            ("database", &self.database),
            ("undistorted", &self.undistorted),
            ("stats", &self.stats),
        ]
    }
}

/// A single normal path component: no separators, no `.` or `..`.
fn is_plain_name(name: &str) -> bool {
    if name.contains('/') || name.contains('\\') {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none()
}

/// Immutable description of one reconstruction run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory holding the input images.
    pub image_dir: PathBuf,
    /// Directory receiving every artifact of the run.
    pub output_dir: PathBuf,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub mapper: MapperOptions,
    #[serde(default)]
    pub fallback: FallbackOptions,
    #[serde(default)]
    pub undistort: UndistortConfig,
    #[serde(default)]
    pub artifacts: ArtifactNames,
}

impl RunConfig {
    /// Configuration with default tunables for the given directories.
    pub fn new(image_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            output_dir: output_dir.into(),
            retrieval: RetrievalConfig::default(),
            features: FeatureConfig::default(),
            matcher: MatcherConfig::default(),
            mapper: MapperOptions::default(),
            fallback: FallbackOptions::default(),
            undistort: UndistortConfig::default(),
            artifacts: ArtifactNames::default(),
        }
    }

    /// Load a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject configurations no stage could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure_config!(
            !self.image_dir.as_os_str().is_empty(),
            "image_dir must not be empty"
        );
        ensure_config!(
            !self.output_dir.as_os_str().is_empty(),
            "output_dir must not be empty"
        );

        ensure_config!(
            self.retrieval.num_matched > 0,
            "retrieval.num_matched must be positive"
        );
        ensure_config!(
            self.features.resize_max > 0,
            "features.resize_max must be positive"
        );

        let m = &self.matcher;
        ensure_config!(m.max_error > 0.0, "matcher.max_error must be positive");
        ensure_config!(
            m.max_epipolar_error > 0.0,
            "matcher.max_epipolar_error must be positive"
        );
        ensure_config!(
            m.confidence > 0.0 && m.confidence < 1.0,
            "matcher.confidence must lie in (0, 1), got {}",
            m.confidence
        );
        ensure_config!(
            m.min_inlier_ratio > 0.0 && m.min_inlier_ratio <= 1.0,
            "matcher.min_inlier_ratio must lie in (0, 1], got {}",
            m.min_inlier_ratio
        );

        let p = &self.mapper;
        ensure_config!(p.max_error > 0.0, "mapper.max_error must be positive");
        ensure_config!(
            p.min_tri_angle > 0.0,
            "mapper.min_tri_angle must be positive"
        );
        ensure_config!(
            p.abs_pose_min_inlier_ratio > 0.0 && p.abs_pose_min_inlier_ratio <= 1.0,
            "mapper.abs_pose_min_inlier_ratio must lie in (0, 1], got {}",
            p.abs_pose_min_inlier_ratio
        );

        let f = &self.fallback;
        ensure_config!(
            !f.camera_model.is_empty(),
            "fallback.camera_model must not be empty"
        );
        ensure_config!(
            f.filter_max_reproj_error > 0.0 && f.abs_pose_max_error > 0.0,
            "fallback error tolerances must be positive"
        );
        ensure_config!(
            f.abs_pose_min_inlier_ratio > 0.0 && f.abs_pose_min_inlier_ratio <= 1.0,
            "fallback.abs_pose_min_inlier_ratio must lie in (0, 1], got {}",
            f.abs_pose_min_inlier_ratio
        );

        ensure_config!(
            self.undistort.max_image_size > 0,
            "undistort.max_image_size must be positive"
        );

        let names = self.artifacts.all();
        for (i, (key, name)) in names.iter().enumerate() {
            ensure_config!(!name.is_empty(), "artifacts.{key} must not be empty");
            ensure_config!(
                is_plain_name(name),
                "artifacts.{key} must be a plain file name, got '{name}'"
            );
            // The database lives inside the sfm directory and may share names
            // with nothing else there.
            if *key == "database" {
                continue;
            }
            for (other_key, other) in &names[i + 1..] {
                if *other_key == "database" {
                    continue;
                }
                ensure_config!(
                    name != other,
                    "artifacts.{key} and artifacts.{other_key} both use '{name}'"
                );
            }
        }
        Ok(())
    }
}
