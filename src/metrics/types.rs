use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::position::FixQuality;

/// How a cycle ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CycleOutcome {
    Persisted,
    CaptureSkipped,
    WriteFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleMetrics {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub outcome: CycleOutcome,
    pub capture_ms: u64,
    pub frame_skew_us: Option<u64>,
    pub fix_ms: Option<u64>,
    pub fix_quality: Option<FixQuality>,
    pub index_ms: Option<u64>,
    pub write_ms: Option<u64>,
    pub total_ms: u64,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub core_current_amps: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub system: SystemMetrics,
    pub recent_cycles: Vec<CycleMetrics>,
    pub cycle_count: u64,
    pub persisted_count: u64,
    pub skipped_count: u64,
    pub failed_write_count: u64,
    pub degraded_fix_count: u64,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            system: SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
            recent_cycles: Vec::new(),
            cycle_count: 0,
            persisted_count: 0,
            skipped_count: 0,
            failed_write_count: 0,
            degraded_fix_count: 0,
        }
    }
}
