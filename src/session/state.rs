use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::metrics::MetricsSnapshot;
use crate::output::OutputArtifact;
use crate::sensing::{PixelFormat, Resolution};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    #[default]
    Initializing,
    Running,
    Draining,
    Stopped,
}

/// Why the Running phase ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionEnd {
    Completed,
    Cancelled,
    Failed,
}

/// Timing and sensor parameters fixed for the whole session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub interval: Duration,
    pub max_duration: Duration,
    pub fix_timeout: Duration,
    pub pixel_format: PixelFormat,
    pub resolution: Resolution,
    pub sample_core_current: bool,
}

/// One run of the capture loop. Elapsed time always comes from `anchor`.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub id: String,
    pub interval: Duration,
    pub max_duration: Duration,
    pub started_at: DateTime<Utc>,
    anchor: Instant,
}

impl CaptureSession {
    pub fn begin(interval: Duration, max_duration: Duration) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            interval,
            max_duration,
            started_at: Utc::now(),
            anchor: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.anchor.elapsed()
    }

    pub fn within_duration(&self) -> bool {
        self.elapsed() < self.max_duration
    }

    /// Sleep before the next cycle: whatever is left of the interval, never negative.
    pub fn next_pause(&self, cycle_elapsed: Duration) -> Duration {
        self.interval.saturating_sub(cycle_elapsed)
    }
}

/// Summary returned when the scheduler stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub end: SessionEnd,
    pub cycles: u64,
    pub artifacts: Vec<OutputArtifact>,
    pub skipped_cycles: u64,
    pub failed_writes: u64,
    pub metrics: MetricsSnapshot,
}
