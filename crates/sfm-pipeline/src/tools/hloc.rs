//! hloc-backed retrieval, local features, matching and incremental mapping.
//!
//! Each operation runs a short Python bridge through the configured
//! interpreter. The bridge receives its arguments as a single JSON document,
//! so every tunable of the run configuration reaches hloc unchanged.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use sfm_core::{FeatureConfig, MatcherConfig, Rankings, RetrievalConfig};

use super::process::run_tool;
use super::{
    IncrementalMapper, LocalFeatureExtractor, MapperRequest, Matcher, RetrievalExtractor,
};

const EXTRACT_BRIDGE: &str = r#"
import json, sys
from pathlib import Path
from hloc import extract_features

args = json.loads(sys.argv[1])
conf = dict(extract_features.confs[args["conf"]])
if args.get("resize_max") is not None:
    conf["preprocessing"] = dict(conf["preprocessing"], resize_max=args["resize_max"])
extract_features.main(conf, Path(args["image_dir"]), feature_path=Path(args["output"]))
"#;

const MATCH_BRIDGE: &str = r#"
import json, sys
from pathlib import Path
from hloc import match_features

args = json.loads(sys.argv[1])
conf = dict(match_features.confs[args["conf"]], **args["verification"])
match_features.main(
    conf,
    Path(args["pairs"]),
    features=Path(args["features"]),
    matches=Path(args["output"]),
)
"#;

const MAPPER_BRIDGE: &str = r#"
import json, sys
from pathlib import Path
import pycolmap
from hloc import reconstruction

args = json.loads(sys.argv[1])
model = reconstruction.main(
    Path(args["sfm_dir"]),
    Path(args["image_dir"]),
    Path(args["pairs"]),
    Path(args["features"]),
    Path(args["matches"]),
    camera_mode=getattr(pycolmap.CameraMode, args["camera_mode"]),
    image_list=args["image_list"],
    mapper_options=args["mapper_options"],
)
if model is None:
    sys.exit("incremental mapping produced no model")
"#;

/// hloc driven through a Python interpreter.
#[derive(Debug, Clone)]
pub struct HlocTools {
    python: PathBuf,
}

impl HlocTools {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    fn run_bridge(&self, tool: &str, script: &str, args: &Value) -> Result<()> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-c").arg(script).arg(args.to_string());
        run_tool(tool, &mut cmd)?;
        Ok(())
    }

    fn run_extract(
        &self,
        tool: &str,
        image_dir: &Path,
        output: &Path,
        mut args: Value,
    ) -> Result<PathBuf> {
        args["image_dir"] = path_arg(image_dir)?;
        args["output"] = path_arg(output)?;
        self.run_bridge(tool, EXTRACT_BRIDGE, &args)?;
        Ok(output.to_path_buf())
    }
}

/// Bridge arguments travel as JSON strings, so paths must be UTF-8.
fn path_arg(path: &Path) -> Result<Value> {
    path.to_str()
        .map(Value::from)
        .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))
}

impl RetrievalExtractor for HlocTools {
    fn extract(
        &self,
        image_dir: &Path,
        output: &Path,
        config: &RetrievalConfig,
    ) -> Result<PathBuf> {
        self.run_extract(
            "hloc global features",
            image_dir,
            output,
            json!({ "conf": config.conf }),
        )
    }

    fn rank(&self, descriptors: &Path, output: &Path, k: usize) -> Result<Rankings> {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-m", "hloc.pairs_from_retrieval"])
            .arg("--descriptors")
            .arg(descriptors)
            .arg("--output")
            .arg(output)
            .arg("--num_matched")
            .arg(k.to_string());
        run_tool("hloc pairs_from_retrieval", &mut cmd)?;
        Rankings::from_pairs_file(output)
            .with_context(|| format!("failed to read rankings from {}", output.display()))
    }
}

impl LocalFeatureExtractor for HlocTools {
    fn extract(&self, image_dir: &Path, output: &Path, config: &FeatureConfig) -> Result<PathBuf> {
        self.run_extract(
            "hloc local features",
            image_dir,
            output,
            json!({ "conf": config.conf, "resize_max": config.resize_max }),
        )
    }
}

impl Matcher for HlocTools {
    fn match_pairs(
        &self,
        pairs: &Path,
        features: &Path,
        output: &Path,
        config: &MatcherConfig,
    ) -> Result<PathBuf> {
        let args = json!({
            "conf": config.conf,
            "pairs": path_arg(pairs)?,
            "features": path_arg(features)?,
            "output": path_arg(output)?,
            "verification": {
                "max_error": config.max_error,
                "confidence": config.confidence,
                "min_inlier_ratio": config.min_inlier_ratio,
                "min_num_inliers": config.min_num_inliers,
                "max_num_trials": config.max_num_trials,
                "max_epipolar_error": config.max_epipolar_error,
            },
        });
        self.run_bridge("hloc matcher", MATCH_BRIDGE, &args)?;
        Ok(output.to_path_buf())
    }
}

impl IncrementalMapper for HlocTools {
    fn reconstruct(&self, request: &MapperRequest<'_>) -> Result<PathBuf> {
        let args = mapper_args(request)?;
        self.run_bridge("hloc reconstruction", MAPPER_BRIDGE, &args)?;
        Ok(request.output_dir.to_path_buf())
    }
}

/// Mapper options as JSON, without the camera mode and unset thread count.
fn mapper_args(request: &MapperRequest<'_>) -> Result<Value> {
    let mut options =
        serde_json::to_value(request.options).context("failed to serialize mapper options")?;
    let map = options
        .as_object_mut()
        .ok_or_else(|| anyhow!("mapper options must serialize to an object"))?;
    map.remove("camera_mode");
    map.retain(|_, value| !value.is_null());

    Ok(json!({
        "sfm_dir": path_arg(request.output_dir)?,
        "image_dir": path_arg(request.image_dir)?,
        "pairs": path_arg(request.pairs)?,
        "features": path_arg(request.features)?,
        "matches": path_arg(request.matches)?,
        "camera_mode": request.camera_mode.as_str(),
        "image_list": request.image_list,
        "mapper_options": options,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sfm_core::{CameraMode, MapperOptions};

    #[test]
    fn mapper_args_carry_options_and_image_list() {
        let options = MapperOptions {
            num_threads: None,
            ..MapperOptions::default()
        };
        let images = vec!["a.jpg".to_string(), "b.jpg".to_string()];
        let request = MapperRequest {
            output_dir: Path::new("out/sfm"),
            image_dir: Path::new("images"),
            pairs: Path::new("out/pairs-sfm.txt"),
            features: Path::new("out/feats.h5"),
            matches: Path::new("out/matches.h5"),
            image_list: &images,
            camera_mode: CameraMode::Single,
            options: &options,
        };

        let args = mapper_args(&request).unwrap();
        assert_eq!(args["camera_mode"], "SINGLE");
        assert_eq!(args["image_list"], json!(["a.jpg", "b.jpg"]));
        let mapper = &args["mapper_options"];
        assert_eq!(mapper["min_num_matches"], 15);
        assert_eq!(mapper["min_tri_angle"], 3.0);
        assert!(mapper.get("camera_mode").is_none());
        assert!(mapper.get("num_threads").is_none());
        assert_eq!(args["sfm_dir"], "out/sfm");
    }
}
