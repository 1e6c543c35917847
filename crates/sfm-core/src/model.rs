//! Minimal inspection of COLMAP sparse models on disk.
//!
//! The pipeline never loads a full reconstruction; it only needs to know
//! whether a directory holds a complete model and how many images that model
//! registered, so it can tell an empty result from a usable one.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MODEL_FILES: [&str; 3] = ["cameras", "images", "points3D"];

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{} does not contain a complete sparse model", .0.display())]
    Incomplete(PathBuf),
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed model file {}: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    Binary,
    Text,
}

impl ModelFormat {
    fn extension(self) -> &'static str {
        match self {
            ModelFormat::Binary => "bin",
            ModelFormat::Text => "txt",
        }
    }
}

/// A sparse model directory and its registered-image count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseModel {
    pub path: PathBuf,
    pub format: ModelFormat,
    pub registered_images: u64,
}

impl SparseModel {
    /// Open the model stored directly in `dir`.
    ///
    /// Binary files win over text files when both are present.
    pub fn open(dir: &Path) -> Result<Self, ModelError> {
        let format = [ModelFormat::Binary, ModelFormat::Text]
            .into_iter()
            .find(|fmt| {
                MODEL_FILES
                    .iter()
                    .all(|stem| dir.join(format!("{stem}.{}", fmt.extension())).is_file())
            })
            .ok_or_else(|| ModelError::Incomplete(dir.to_path_buf()))?;

        let images = dir.join(format!("images.{}", format.extension()));
        let registered_images = match format {
            ModelFormat::Binary => count_binary_images(&images)?,
            ModelFormat::Text => count_text_images(&images)?,
        };

        Ok(Self {
            path: dir.to_path_buf(),
            format,
            registered_images,
        })
    }

    /// True if the model registered no image at all.
    pub fn is_empty(&self) -> bool {
        self.registered_images == 0
    }

    /// Find the largest model under `root`.
    ///
    /// Mappers write either straight into `root` or into numbered
    /// sub-directories (`0`, `1`, ...), one per disconnected model. The
    /// candidate with the most registered images wins; ties go to the
    /// lowest index. Returns `Ok(None)` if no candidate is complete.
    pub fn find_best(root: &Path) -> Result<Option<Self>, ModelError> {
        let mut candidates = Vec::new();
        if let Ok(model) = Self::open(root) {
            candidates.push((0usize, model));
        }

        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ModelError::Io {
                    path: root.to_path_buf(),
                    source,
                });
            }
        };
        for entry in entries {
            let entry = entry.map_err(|source| ModelError::Io {
                path: root.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            let Some(index) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<usize>().ok())
            else {
                continue;
            };
            if !path.is_dir() {
                continue;
            }
            match Self::open(&path) {
                Ok(model) => candidates.push((index + 1, model)),
                Err(ModelError::Incomplete(_)) => {}
                Err(err) => return Err(err),
            }
        }

        candidates.sort_by(|(ia, a), (ib, b)| {
            b.registered_images
                .cmp(&a.registered_images)
                .then(ia.cmp(ib))
        });
        Ok(candidates.into_iter().next().map(|(_, model)| model))
    }
}

fn read_err(path: &Path) -> impl FnOnce(std::io::Error) -> ModelError + '_ {
    move |source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// `images.bin` starts with the image count as a little-endian u64.
fn count_binary_images(path: &Path) -> Result<u64, ModelError> {
    let mut file = fs::File::open(path).map_err(read_err(path))?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            ModelError::Malformed {
                path: path.to_path_buf(),
                reason: "file shorter than the 8-byte image count".to_string(),
            }
        } else {
            read_err(path)(err)
        }
    })?;
    Ok(u64::from_le_bytes(header))
}

/// `images.txt` holds two lines per image: a header line, then its 2D
/// points (possibly empty). Comments start with `#`.
fn count_text_images(path: &Path) -> Result<u64, ModelError> {
    let data = fs::read_to_string(path).map_err(read_err(path))?;
    let records = data
        .lines()
        .filter(|line| !line.starts_with('#'))
        .collect::<Vec<_>>();
    let count = records
        .iter()
        .step_by(2)
        .filter(|line| !line.trim().is_empty())
        .count();
    Ok(count as u64)
}
