//! Intermediate-artifact lifecycle.
//!
//! Every stage of a run writes named outputs (files or directories) below the
//! run's output directory. Delegated tools tend to append to or skip existing
//! outputs, so a stale artifact left by a previous run must be removed before
//! its producing stage runs, and a stage that claims success must have left
//! an artifact of the expected kind behind.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RunConfig;
use crate::stage::Stage;

/// Logical name of the global-descriptor archive.
pub const RETRIEVAL: &str = "retrieval";
/// Logical name of the raw retrieval ranking (`query db` lines).
pub const RANKINGS: &str = "rankings";
/// Logical name of the selected pair list.
pub const PAIRS: &str = "pairs";
/// Logical name of the local-feature archive.
pub const FEATURES: &str = "features";
/// Logical name of the match archive.
pub const MATCHES: &str = "matches";
/// Logical name of the sparse reconstruction directory.
pub const SFM: &str = "sfm";
/// Logical name of the undistorted image directory.
pub const UNDISTORTED: &str = "undistorted";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to remove stale artifact '{name}' at {}", .path.display())]
    Cleanup {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("expected {expected} was not produced at {}", .path.display())]
    Missing { path: PathBuf, expected: ArtifactKind },
    #[error("expected a {expected} at {}, found a {found}", .path.display())]
    KindMismatch {
        path: PathBuf,
        expected: ArtifactKind,
        found: ArtifactKind,
    },
    #[error("failed to inspect {}", .path.display())]
    Inspect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no artifact named '{0}' is registered")]
    Unregistered(String),
}

/// Filesystem shape of an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    File,
    Directory,
}

impl ArtifactKind {
    fn of(meta: &fs::Metadata) -> Self {
        if meta.is_dir() {
            ArtifactKind::Directory
        } else {
            ArtifactKind::File
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::File => f.write_str("file"),
            ArtifactKind::Directory => f.write_str("directory"),
        }
    }
}

/// A named, path-addressed unit of pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Logical name, unique within a run.
    pub name: String,
    /// Location on disk.
    pub path: PathBuf,
    /// Expected shape once produced.
    pub kind: ArtifactKind,
    /// Stage expected to produce it.
    pub producer: Stage,
}

impl Artifact {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        kind: ArtifactKind,
        producer: Stage,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind,
            producer,
        }
    }
}

/// Remove whatever exists at `path` so the owning stage starts from nothing.
///
/// Directories are removed recursively; a symlink is removed itself and never
/// followed. Returns `true` when something was removed and `false` when the
/// path did not exist. Removal failures are surfaced, not retried.
pub fn ensure_clean(name: &str, path: &Path) -> Result<bool, ArtifactError> {
    let cleanup_err = |source: io::Error| ArtifactError::Cleanup {
        name: name.to_string(),
        path: path.to_path_buf(),
        source,
    };

    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(cleanup_err(err)),
    };

    if meta.is_dir() {
        fs::remove_dir_all(path).map_err(cleanup_err)?;
    } else {
        fs::remove_file(path).map_err(cleanup_err)?;
    }
    debug!("removed stale artifact '{}' at {}", name, path.display());
    Ok(true)
}

/// Pure existence check. A dangling symlink counts as existing.
pub fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Confirm that a stage actually left an artifact of the expected kind.
pub fn verify_produced(path: &Path, expected: ArtifactKind) -> Result<(), ArtifactError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ArtifactError::Missing {
                path: path.to_path_buf(),
                expected,
            });
        }
        Err(source) => {
            return Err(ArtifactError::Inspect {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let found = ArtifactKind::of(&meta);
    if found != expected {
        return Err(ArtifactError::KindMismatch {
            path: path.to_path_buf(),
            expected,
            found,
        });
    }
    Ok(())
}

/// Resolved on-disk layout of a run's outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    pub output_dir: PathBuf,
    pub retrieval: PathBuf,
    pub rankings: PathBuf,
    pub pairs: PathBuf,
    pub features: PathBuf,
    pub matches: PathBuf,
    pub sfm_dir: PathBuf,
    /// Correspondence database written below `sfm_dir`.
    pub database: PathBuf,
    pub undistorted: PathBuf,
    pub stats_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn from_config(config: &RunConfig) -> Self {
        let out = &config.output_dir;
        let names = &config.artifacts;
        let sfm_dir = out.join(&names.sfm);
        Self {
            output_dir: out.clone(),
            retrieval: out.join(&names.retrieval),
            rankings: out.join(&names.rankings),
            pairs: out.join(&names.pairs),
            features: out.join(&names.features),
            matches: out.join(&names.matches),
            database: sfm_dir.join(&names.database),
            sfm_dir,
            undistorted: out.join(&names.undistorted),
            stats_dir: out.join(&names.stats),
        }
    }

    /// Stage-owned artifacts in production order.
    ///
    /// The stats directory is not listed: reports accumulate across runs.
    pub fn artifacts(&self) -> Vec<Artifact> {
        use ArtifactKind::{Directory, File};
        vec![
            Artifact::new(RETRIEVAL, &self.retrieval, File, Stage::Retrieval),
            Artifact::new(RANKINGS, &self.rankings, File, Stage::Retrieval),
            Artifact::new(PAIRS, &self.pairs, File, Stage::PairSelection),
            Artifact::new(FEATURES, &self.features, File, Stage::FeatureExtraction),
            Artifact::new(MATCHES, &self.matches, File, Stage::Matching),
            Artifact::new(SFM, &self.sfm_dir, Directory, Stage::Reconstruction),
            Artifact::new(UNDISTORTED, &self.undistorted, Directory, Stage::Undistortion),
        ]
    }
}

/// Registry of the artifacts a run produces.
#[derive(Debug, Clone, Default)]
pub struct ArtifactStore {
    artifacts: Vec<Artifact>,
}

impl ArtifactStore {
    pub fn new(artifacts: Vec<Artifact>) -> Self {
        Self { artifacts }
    }

    pub fn from_layout(layout: &ArtifactLayout) -> Self {
        Self::new(layout.artifacts())
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    pub fn require(&self, name: &str) -> Result<&Artifact, ArtifactError> {
        self.get(name)
            .ok_or_else(|| ArtifactError::Unregistered(name.to_string()))
    }

    /// Remove the stale copy of a registered artifact.
    pub fn clean(&self, name: &str) -> Result<bool, ArtifactError> {
        let artifact = self.require(name)?;
        ensure_clean(&artifact.name, &artifact.path)
    }

    /// Remove stale copies of every registered artifact.
    ///
    /// Stops at the first failure. Returns the artifacts that were removed.
    pub fn clean_all(&self) -> Result<Vec<&Artifact>, ArtifactError> {
        let mut removed = Vec::new();
        for artifact in &self.artifacts {
            if ensure_clean(&artifact.name, &artifact.path)? {
                removed.push(artifact);
            }
        }
        Ok(removed)
    }

    /// Check a registered artifact against its expected kind.
    pub fn verify(&self, name: &str) -> Result<&Path, ArtifactError> {
        let artifact = self.require(name)?;
        verify_produced(&artifact.path, artifact.kind)?;
        Ok(&artifact.path)
    }
}
