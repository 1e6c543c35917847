//! Stage timer and timing record.
//!
//! A `TimingRecord` starts its end-to-end clock when created. Stages are
//! recorded in execution order and may each be recorded once. The run total
//! is measured, not summed, so it always covers every recorded stage plus the
//! orchestration between them.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reserved key for the end-to-end duration.
pub const TOTAL: &str = "Total";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimingError {
    #[error("stage '{0}' was already timed in this run")]
    DuplicateStage(String),
    #[error("'Total' is reserved for the end-to-end duration")]
    ReservedName,
}

/// Timing entry describing a single stage of the run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageTiming {
    pub label: String,
    pub elapsed_s: f64,
}

impl StageTiming {
    pub fn new(label: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            label: label.into(),
            elapsed_s: elapsed.as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TimingRecord {
    started: Instant,
    stages: Vec<StageTiming>,
    total: Option<Duration>,
}

impl Default for TimingRecord {
    fn default() -> Self {
        Self::start()
    }
}

impl TimingRecord {
    /// Start the end-to-end clock.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            stages: Vec::new(),
            total: None,
        }
    }

    /// Record a measured stage duration.
    pub fn record(&mut self, label: &str, elapsed: Duration) -> Result<(), TimingError> {
        if label == TOTAL {
            return Err(TimingError::ReservedName);
        }
        if self.contains(label) {
            return Err(TimingError::DuplicateStage(label.to_string()));
        }
        self.stages.push(StageTiming::new(label, elapsed));
        Ok(())
    }

    /// Record a stage that took `elapsed` and pass its outcome through.
    ///
    /// The stage is recorded whether it succeeded or not. The stage's own
    /// error wins over a timing error: a failing stage is reported as such
    /// even if its label was a duplicate.
    pub fn record_outcome<T, E>(
        &mut self,
        label: &str,
        elapsed: Duration,
        outcome: Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<TimingError>,
    {
        let recorded = self.record(label, elapsed);
        let value = outcome?;
        recorded?;
        Ok(value)
    }

    pub fn contains(&self, label: &str) -> bool {
        self.stages.iter().any(|s| s.label == label)
    }

    /// Recorded stages in execution order.
    pub fn stages(&self) -> &[StageTiming] {
        &self.stages
    }

    /// Stop the end-to-end clock. Later calls keep the first measurement.
    pub fn finish(&mut self) -> Duration {
        *self.total.get_or_insert_with(|| self.started.elapsed())
    }
}
