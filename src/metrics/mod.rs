mod power;
mod types;

pub use power::{parse_core_current, read_core_current};
pub use types::{CycleMetrics, CycleOutcome, MetricsSnapshot, SystemMetrics};

use std::collections::VecDeque;
use std::sync::Arc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::sync::Mutex;

use crate::position::FixQuality;

const MAX_RECENT_CYCLES: usize = 20;

pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsState>>,
}

struct MetricsState {
    recent_cycles: VecDeque<CycleMetrics>,
    cycle_count: u64,
    persisted_count: u64,
    skipped_count: u64,
    failed_write_count: u64,
    degraded_fix_count: u64,
    system: System,
    pid: Pid,
}

impl MetricsState {
    fn sample(&mut self) -> SystemMetrics {
        let pid = self.pid;
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        match self.system.process(pid) {
            Some(process) => SystemMetrics {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => SystemMetrics {
                cpu_percent: 0.0,
                memory_mb: 0.0,
            },
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        let pid = Pid::from_u32(std::process::id());

        // Initial refresh to establish baseline for CPU calculation
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]));

        Self {
            inner: Arc::new(Mutex::new(MetricsState {
                recent_cycles: VecDeque::with_capacity(MAX_RECENT_CYCLES),
                cycle_count: 0,
                persisted_count: 0,
                skipped_count: 0,
                failed_write_count: 0,
                degraded_fix_count: 0,
                system,
                pid,
            })),
        }
    }

    /// Sample current CPU and memory usage. Call this once per cycle.
    /// CPU usage is a delta, so it needs refreshes spread over time.
    pub async fn sample_system_metrics(&self) -> SystemMetrics {
        self.inner.lock().await.sample()
    }

    pub async fn record_cycle(&self, metrics: CycleMetrics) {
        let mut state = self.inner.lock().await;

        state.cycle_count += 1;
        match metrics.outcome {
            CycleOutcome::Persisted => state.persisted_count += 1,
            CycleOutcome::CaptureSkipped => state.skipped_count += 1,
            CycleOutcome::WriteFailed => state.failed_write_count += 1,
        }
        if metrics.fix_quality == Some(FixQuality::Degraded) {
            state.degraded_fix_count += 1;
        }

        state.recent_cycles.push_back(metrics);
        while state.recent_cycles.len() > MAX_RECENT_CYCLES {
            state.recent_cycles.pop_front();
        }
    }

    pub async fn get_snapshot(&self) -> MetricsSnapshot {
        let mut state = self.inner.lock().await;
        let system = state.sample();

        MetricsSnapshot {
            system,
            recent_cycles: state.recent_cycles.iter().cloned().collect(),
            cycle_count: state.cycle_count,
            persisted_count: state.persisted_count,
            skipped_count: state.skipped_count,
            failed_write_count: state.failed_write_count,
            degraded_fix_count: state.degraded_fix_count,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MetricsCollector {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
