use thiserror::Error;

/// Failures of the delegated stages that the orchestrator tells apart.
///
/// Errors from the data model (`ArtifactError`, `PairError`, ...) are
/// propagated as they are; this enum only covers what happens once work
/// has been handed to an external tool.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("primary reconstruction failed: {0}")]
    ReconstructionFailed(String),
    #[error("fallback reconstruction failed: {0}")]
    FallbackFailed(String),
    #[error("undistortion failed: {0}")]
    UndistortionFailed(String),
    #[error("{tool} {status}{}", tail_suffix(.stderr))]
    ExternalTool {
        tool: String,
        status: String,
        /// Last lines of the tool's stderr.
        stderr: String,
    },
}

fn tail_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}
