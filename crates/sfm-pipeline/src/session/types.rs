//! Run bookkeeping types: metadata and the operation log.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Metadata about a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Crate version that produced the run.
    pub pipeline_version: String,

    /// Unix timestamp when the run context was created (seconds since epoch).
    pub started_at: u64,

    /// Unix timestamp of the last recorded operation.
    pub last_modified: u64,

    /// Optional user-provided description.
    pub description: Option<String>,
}

impl RunMetadata {
    pub fn new() -> Self {
        let now = current_timestamp();
        Self {
            pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: now,
            last_modified: now,
            description: None,
        }
    }

    /// Update the last_modified timestamp to now.
    pub fn touch(&mut self) {
        self.last_modified = current_timestamp();
    }
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Lightweight operation log entry.
///
/// One entry per timed stage, plus entries for notable events such as the
/// reconstruction fallback. Intended for the report's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix timestamp of the operation (seconds since epoch).
    pub timestamp: u64,

    /// Operation name, usually a stage label.
    pub operation: String,

    /// Whether the operation succeeded.
    pub success: bool,

    /// Optional notes or error message.
    pub notes: Option<String>,
}

impl LogEntry {
    pub fn success(operation: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: true,
            notes: None,
        }
    }

    pub fn success_with_notes(operation: impl Into<String>, notes: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: true,
            notes: Some(notes.into()),
        }
    }

    pub fn failure(operation: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp(),
            operation: operation.into(),
            success: false,
            notes: Some(error.into()),
        }
    }
}

/// Current Unix timestamp in seconds; 0 if the clock is before the epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
