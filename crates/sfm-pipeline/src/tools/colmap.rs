//! COLMAP command-line backed fallback, rectification and model statistics.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use sfm_core::{FallbackOptions, UndistortConfig};

use super::process::run_tool;
use super::{FallbackReconstructor, FallbackRequest, ModelAnalyzer, Rectifier};

/// The `colmap` executable.
#[derive(Debug, Clone)]
pub struct ColmapTools {
    colmap: PathBuf,
}

impl ColmapTools {
    pub fn new(colmap: impl Into<PathBuf>) -> Self {
        Self {
            colmap: colmap.into(),
        }
    }

    fn run(&self, subcommand: &str, args: Vec<OsString>) -> Result<std::process::Output> {
        let mut cmd = Command::new(&self.colmap);
        cmd.arg(subcommand).args(args);
        Ok(run_tool(&format!("colmap {subcommand}"), &mut cmd)?)
    }
}

fn flag(name: &str, value: impl Into<OsString>) -> [OsString; 2] {
    [OsString::from(name), value.into()]
}

fn bool_flag(value: bool) -> &'static str {
    if value { "1" } else { "0" }
}

fn feature_extractor_args(request: &FallbackRequest<'_>) -> Vec<OsString> {
    let opts = request.options;
    let mut args: Vec<OsString> = [
        flag("--database_path", request.database),
        flag("--image_path", request.image_dir),
        flag("--ImageReader.single_camera", bool_flag(opts.single_camera)),
        flag("--ImageReader.camera_model", opts.camera_model.as_str()),
    ]
    .into_iter()
    .flatten()
    .collect();
    if let Some(params) = &opts.camera_params {
        args.extend(flag("--ImageReader.camera_params", params.as_str()));
    }
    args
}

fn mapper_args(request: &FallbackRequest<'_>) -> Vec<OsString> {
    let opts: &FallbackOptions = request.options;
    let mapper = [
        ("init_min_tri_angle", opts.init_min_tri_angle.to_string()),
        ("ba_global_images_ratio", opts.ba_global_images_ratio.to_string()),
        ("ba_global_points_ratio", opts.ba_global_points_ratio.to_string()),
        ("filter_max_reproj_error", opts.filter_max_reproj_error.to_string()),
        ("min_num_matches", opts.min_num_matches.to_string()),
        ("abs_pose_min_num_inliers", opts.abs_pose_min_num_inliers.to_string()),
        ("abs_pose_min_inlier_ratio", opts.abs_pose_min_inlier_ratio.to_string()),
        ("abs_pose_max_error", opts.abs_pose_max_error.to_string()),
        ("filter_min_tri_angle", opts.filter_min_tri_angle.to_string()),
    ];

    let mut args: Vec<OsString> = [
        flag("--database_path", request.database),
        flag("--image_path", request.image_dir),
        flag("--output_path", request.output_dir),
    ]
    .into_iter()
    .flatten()
    .collect();
    for (name, value) in mapper {
        args.extend(flag(&format!("--Mapper.{name}"), value));
    }
    args
}

impl FallbackReconstructor for ColmapTools {
    fn reconstruct(&self, request: &FallbackRequest<'_>) -> Result<PathBuf> {
        std::fs::create_dir_all(request.output_dir).with_context(|| {
            format!("failed to create {}", request.output_dir.display())
        })?;

        self.run("feature_extractor", feature_extractor_args(request))?;
        self.run(
            "exhaustive_matcher",
            flag("--database_path", request.database).into(),
        )?;
        self.run("mapper", mapper_args(request))?;
        Ok(request.output_dir.to_path_buf())
    }
}

impl Rectifier for ColmapTools {
    fn undistort(
        &self,
        image_dir: &Path,
        model: &Path,
        output: &Path,
        config: &UndistortConfig,
    ) -> Result<()> {
        let args = [
            flag("--image_path", image_dir),
            flag("--output_path", output),
            flag("--input_path", model),
            flag("--max_image_size", config.max_image_size.to_string()),
            flag("--output_type", config.output_type.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect();
        self.run("image_undistorter", args)?;
        Ok(())
    }
}

impl ModelAnalyzer for ColmapTools {
    fn analyze(&self, model: &Path) -> Result<String> {
        let output = self.run("model_analyzer", flag("--path", model).into())?;
        // Recent COLMAP versions log the summary to stderr.
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&text).trim_end().to_string())
    }
}
