//! Run context: the mutable state container threaded through every stage.
//!
//! A `RunContext` owns the immutable configuration, the resolved artifact
//! layout, the timing record, the operation log and the intermediate state.
//! Step functions read their inputs from the context and store their outputs
//! back into it.
//!
//! ```no_run
//! use sfm_core::{RunConfig, Stage};
//! use sfm_pipeline::session::RunContext;
//! use sfm_pipeline::{Toolchain, step_retrieval};
//! # fn main() -> anyhow::Result<()> {
//! let tools = Toolchain::external("python3", "colmap");
//! let mut ctx = RunContext::new(RunConfig::new("scene/images", "scene/outputs"))?;
//! ctx.prepare()?;
//! ctx.time_stage(Stage::Retrieval, |ctx| step_retrieval(ctx, tools.retrieval.as_ref()))?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod types;

pub use context::{RunContext, RunState};
pub use types::{LogEntry, RunMetadata, current_timestamp};
