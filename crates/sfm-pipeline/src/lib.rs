//! Stage orchestration for retrieval-based structure-from-motion runs.
//!
//! The crate sequences the stages of a run over a [`session::RunContext`],
//! delegates the heavy lifting to the collaborators of a [`Toolchain`], falls
//! back to exhaustive reconstruction when the primary mapper fails, and
//! always leaves a report behind.
//!
//! ## Full run
//!
//! ```no_run
//! use sfm_core::RunConfig;
//! use sfm_pipeline::{RunContext, Toolchain, run_pipeline};
//! # fn main() -> anyhow::Result<()> {
//! let mut ctx = RunContext::new(RunConfig::new("scene/images", "scene/outputs"))?;
//! let report = run_pipeline(&mut ctx, &Toolchain::external("python3", "colmap"))?;
//! println!("report: {}", report.markdown_path.display());
//! # Ok(())
//! # }
//! ```
//!
//! ## Step by step
//!
//! The step functions can be called directly; [`RunContext::time_stage`]
//! records their durations the same way the orchestrator does.

pub mod error;
pub mod orchestrator;
pub mod reconstruction;
pub mod report;
pub mod session;
pub mod steps;
pub mod tools;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use crate::error::StageError;
pub use crate::orchestrator::{ReportGuard, run_pipeline};
pub use crate::reconstruction::{
    IllegalTransition, PhaseTracker, ReconstructionPhase, ReconstructionResult, Strategy,
    step_reconstruction,
};
pub use crate::report::{ModelSection, RunReport, write_report};
pub use crate::session::{LogEntry, RunContext, RunMetadata, RunState};
pub use crate::steps::{
    step_features, step_matching, step_pairs, step_retrieval, step_statistics, step_undistortion,
};
pub use crate::tools::{
    ColmapTools, FallbackReconstructor, FallbackRequest, HlocTools, IncrementalMapper,
    LocalFeatureExtractor, MapperRequest, Matcher, ModelAnalyzer, Rectifier, RetrievalExtractor,
    Toolchain,
};
