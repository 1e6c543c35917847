use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered stages of a reconstruction run.
///
/// The declaration order is the execution order used by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Retrieval,
    PairSelection,
    FeatureExtraction,
    Matching,
    Reconstruction,
    Undistortion,
    ModelStatistics,
}

impl Stage {
    /// Human-readable label used as the timing-record key.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Retrieval => "Retrieval",
            Stage::PairSelection => "Pair Selection",
            Stage::FeatureExtraction => "Feature Extraction",
            Stage::Matching => "Feature Matching",
            Stage::Reconstruction => "Reconstruction",
            Stage::Undistortion => "Image Undistortion",
            Stage::ModelStatistics => "Model Statistics",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
