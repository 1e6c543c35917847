//! Core data model for `sfm-pipeline` runs.
//!
//! This crate provides the pieces of a reconstruction run that do not depend
//! on any delegated tool:
//!
//! - the immutable run configuration (`RunConfig`) and its per-stage tunables,
//! - artifact lifecycle helpers (stale-output cleanup and production checks),
//! - the stage timer and its insertion-ordered timing record,
//! - pair selection from per-image retrieval rankings,
//! - the image catalog and the sparse-model inspector.
//!
//! Stage orchestration, the collaborator traits and the report live in the
//! `sfm-pipeline` crate.
//!
//! # Example
//!
//! ```no_run
//! use sfm_core::{Rankings, select_pairs};
//!
//! let images = vec!["a.jpg".to_string(), "b.jpg".to_string(), "c.jpg".to_string()];
//! let mut rankings = Rankings::default();
//! rankings.push("a.jpg", ["b.jpg", "c.jpg"]);
//! rankings.push("b.jpg", ["a.jpg"]);
//!
//! let pairs = select_pairs(&images, &rankings, 25).unwrap();
//! assert_eq!(pairs.len(), 2);
//! ```

/// Artifact registry, cleanup and production checks.
pub mod artifact;
/// Run configuration and per-stage tunables.
pub mod config;
/// Image catalog of the input directory.
pub mod images;
/// Sparse model inspection.
pub mod model;
/// Retrieval rankings and pair selection.
pub mod pairs;
/// Pipeline stage identifiers.
mod stage;
/// Stage timer and timing record.
pub mod timing;

pub use artifact::{
    Artifact, ArtifactError, ArtifactKind, ArtifactLayout, ArtifactStore, ensure_clean, exists,
    verify_produced,
};
pub use config::{
    ArtifactNames, CameraMode, ConfigError, FallbackOptions, FeatureConfig, MapperOptions,
    MatcherConfig, RetrievalConfig, RunConfig, UndistortConfig,
};
pub use images::{ImageCatalogError, list_images};
pub use model::{ModelError, ModelFormat, SparseModel};
pub use pairs::{ImagePair, PairError, PairList, Rankings, select_pairs};
pub use stage::Stage;
pub use timing::{StageTiming, TimingError, TimingRecord};
