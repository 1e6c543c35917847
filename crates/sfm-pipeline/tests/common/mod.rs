//! In-memory toolchain for pipeline tests.
//!
//! The fakes write small text files where the real tools write archives, and
//! behave like the real tools where the pipeline depends on it (for example,
//! feature extraction leaves an existing archive untouched).

#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, bail};
use sfm_core::{
    FeatureConfig, MatcherConfig, Rankings, RetrievalConfig, RunConfig, UndistortConfig,
    list_images,
};
use sfm_pipeline::{
    FallbackReconstructor, FallbackRequest, IncrementalMapper, LocalFeatureExtractor,
    MapperRequest, Matcher, ModelAnalyzer, Rectifier, RetrievalExtractor, RunContext, Toolchain,
};
use tempfile::TempDir;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A scratch scene with `n` empty images.
pub struct Scene {
    pub dir: TempDir,
    pub images: PathBuf,
    pub outputs: PathBuf,
}

impl Scene {
    pub fn new(n: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        fs::create_dir(&images).unwrap();
        for i in 0..n {
            fs::write(images.join(format!("frame_{i:03}.jpg")), b"jpeg").unwrap();
        }
        let outputs = dir.path().join("outputs");
        Self {
            dir,
            images,
            outputs,
        }
    }

    pub fn config(&self) -> RunConfig {
        RunConfig::new(&self.images, &self.outputs)
    }

    pub fn context(&self) -> RunContext {
        RunContext::new(self.config()).unwrap()
    }
}

/// Shared record of collaborator calls, in order.
pub type CallLog = Rc<RefCell<Vec<String>>>;

fn note(calls: &CallLog, call: impl Into<String>) {
    calls.borrow_mut().push(call.into());
}

/// Write a minimal binary sparse model registering `images` images.
pub fn write_model(dir: &Path, images: u64) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("cameras.bin"), 1u64.to_le_bytes()).unwrap();
    fs::write(dir.join("images.bin"), images.to_le_bytes()).unwrap();
    fs::write(dir.join("points3D.bin"), 0u64.to_le_bytes()).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

/// Descriptor archive = image names; every image ranks all others.
pub struct FakeRetrieval {
    pub calls: CallLog,
    pub fail: bool,
}

impl RetrievalExtractor for FakeRetrieval {
    fn extract(&self, image_dir: &Path, output: &Path, config: &RetrievalConfig) -> Result<PathBuf> {
        note(&self.calls, format!("retrieval:{}", config.conf));
        if self.fail {
            bail!("netvlad weights not found");
        }
        let names = list_images(image_dir)?;
        fs::write(output, names.join("\n"))?;
        Ok(output.to_path_buf())
    }

    fn rank(&self, descriptors: &Path, output: &Path, k: usize) -> Result<Rankings> {
        note(&self.calls, format!("rank:{k}"));
        let data = fs::read_to_string(descriptors)?;
        let names: Vec<&str> = data.lines().filter(|l| !l.is_empty()).collect();
        let mut lines = String::new();
        for query in &names {
            for neighbor in names.iter().filter(|n| *n != query).take(k) {
                lines.push_str(&format!("{query} {neighbor}\n"));
            }
        }
        fs::write(output, lines)?;
        Ok(Rankings::from_pairs_file(output)?)
    }
}

/// Keeps an existing archive, like hloc without `overwrite`.
pub struct FakeFeatures {
    pub calls: CallLog,
}

impl LocalFeatureExtractor for FakeFeatures {
    fn extract(&self, _image_dir: &Path, output: &Path, config: &FeatureConfig) -> Result<PathBuf> {
        note(&self.calls, format!("features:{}", config.resize_max));
        if !output.exists() {
            fs::write(output, format!("resize_max={}\n", config.resize_max))?;
        }
        Ok(output.to_path_buf())
    }
}

pub struct FakeMatcher {
    pub calls: CallLog,
}

impl Matcher for FakeMatcher {
    fn match_pairs(
        &self,
        pairs: &Path,
        _features: &Path,
        output: &Path,
        _config: &MatcherConfig,
    ) -> Result<PathBuf> {
        let n = fs::read_to_string(pairs)?.lines().count();
        note(&self.calls, format!("match:{n}"));
        fs::write(output, format!("pairs={n}\n"))?;
        Ok(output.to_path_buf())
    }
}

#[derive(Debug, Clone)]
pub enum MapperBehavior {
    Register(u64),
    Empty,
    Fail(&'static str),
}

/// Writes a database and a model straight into the sfm directory.
pub struct FakeMapper {
    pub calls: CallLog,
    pub behavior: MapperBehavior,
}

impl IncrementalMapper for FakeMapper {
    fn reconstruct(&self, request: &MapperRequest<'_>) -> Result<PathBuf> {
        note(
            &self.calls,
            format!("mapper:{}:{}", request.camera_mode.as_str(), request.image_list.len()),
        );
        fs::write(request.output_dir.join("database.db"), b"primary")?;
        match self.behavior {
            MapperBehavior::Register(n) => write_model(request.output_dir, n),
            MapperBehavior::Empty => write_model(request.output_dir, 0),
            MapperBehavior::Fail(msg) => bail!("{msg}"),
        }
        Ok(request.output_dir.to_path_buf())
    }
}

#[derive(Debug, Clone)]
pub enum FallbackBehavior {
    /// One numbered model per entry.
    Register(Vec<u64>),
    Fail(&'static str),
}

/// Records whether the primary database was gone when it started.
pub struct FakeFallback {
    pub calls: CallLog,
    pub behavior: FallbackBehavior,
}

impl FallbackReconstructor for FakeFallback {
    fn reconstruct(&self, request: &FallbackRequest<'_>) -> Result<PathBuf> {
        let clean = !sfm_core::exists(request.database);
        note(&self.calls, format!("fallback:clean={clean}"));
        match &self.behavior {
            FallbackBehavior::Register(models) => {
                fs::write(request.database, b"fallback")?;
                for (i, n) in models.iter().enumerate() {
                    write_model(&request.output_dir.join(i.to_string()), *n);
                }
                Ok(request.output_dir.to_path_buf())
            }
            FallbackBehavior::Fail(msg) => bail!("{msg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RectifierBehavior {
    Write,
    NoOutput,
    Fail(&'static str),
}

pub struct FakeRectifier {
    pub calls: CallLog,
    pub behavior: RectifierBehavior,
}

impl Rectifier for FakeRectifier {
    fn undistort(
        &self,
        image_dir: &Path,
        model: &Path,
        output: &Path,
        config: &UndistortConfig,
    ) -> Result<()> {
        note(
            &self.calls,
            format!("undistort:{}:{}", model.display(), config.max_image_size),
        );
        match self.behavior {
            RectifierBehavior::Write => {
                let images = output.join("images");
                fs::create_dir_all(&images)?;
                for name in list_images(image_dir)? {
                    fs::write(images.join(name), b"rectified")?;
                }
                Ok(())
            }
            RectifierBehavior::NoOutput => Ok(()),
            RectifierBehavior::Fail(msg) => bail!("{msg}"),
        }
    }
}

pub struct FakeAnalyzer {
    pub calls: CallLog,
    pub fail: bool,
}

impl ModelAnalyzer for FakeAnalyzer {
    fn analyze(&self, model: &Path) -> Result<String> {
        note(&self.calls, "analyze");
        if self.fail {
            bail!("model_analyzer exited with code 1");
        }
        let model = sfm_core::SparseModel::open(model)?;
        Ok(format!("Registered images: {}", model.registered_images))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Toolchain builder
// ─────────────────────────────────────────────────────────────────────────────

/// Behaviour of every fake; defaults describe a clean successful run.
#[derive(Debug, Clone)]
pub struct FakeSetup {
    pub retrieval_fails: bool,
    pub mapper: MapperBehavior,
    pub fallback: FallbackBehavior,
    pub rectifier: RectifierBehavior,
    pub analyzer_fails: bool,
}

impl Default for FakeSetup {
    fn default() -> Self {
        Self {
            retrieval_fails: false,
            mapper: MapperBehavior::Register(10),
            fallback: FallbackBehavior::Register(vec![3]),
            rectifier: RectifierBehavior::Write,
            analyzer_fails: false,
        }
    }
}

impl FakeSetup {
    pub fn build(self) -> (Toolchain, CallLog) {
        let calls = CallLog::default();
        let tools = Toolchain {
            retrieval: Box::new(FakeRetrieval {
                calls: calls.clone(),
                fail: self.retrieval_fails,
            }),
            features: Box::new(FakeFeatures {
                calls: calls.clone(),
            }),
            matcher: Box::new(FakeMatcher {
                calls: calls.clone(),
            }),
            mapper: Box::new(FakeMapper {
                calls: calls.clone(),
                behavior: self.mapper,
            }),
            fallback: Box::new(FakeFallback {
                calls: calls.clone(),
                behavior: self.fallback,
            }),
            rectifier: Box::new(FakeRectifier {
                calls: calls.clone(),
                behavior: self.rectifier,
            }),
            analyzer: Box::new(FakeAnalyzer {
                calls: calls.clone(),
                fail: self.analyzer_fails,
            }),
        };
        (tools, calls)
    }
}

/// Stage rows of a Markdown report, the total excluded.
pub fn stage_rows(markdown: &str) -> Vec<String> {
    markdown
        .lines()
        .filter(|l| l.starts_with("| ") && !l.starts_with("| Step") && !l.starts_with("| **"))
        .map(|l| l.trim_matches('|').split('|').next().unwrap_or("").trim().to_string())
        .collect()
}
