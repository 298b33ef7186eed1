//! Thread-safe metrics collection system
//!
//! Atomic counters for the task lifecycle and mutex-protected timing samples
//! per stage kind. Counters are process-wide; the task registry itself is not.

use crate::task::StageKind;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Samples kept per stage before the oldest are dropped
const MAX_TIMING_SAMPLES: usize = 1000;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    tasks_created: AtomicU64,
    tasks_processing: AtomicU64,
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    submissions_rejected: AtomicU64,
    tasks_evicted: AtomicU64,
    max_concurrent_stages: AtomicU64,

    stage_stats: Mutex<HashMap<StageKind, StageExecutionStats>>,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tasks_created: AtomicU64::new(0),
            tasks_processing: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            submissions_rejected: AtomicU64::new(0),
            tasks_evicted: AtomicU64::new(0),
            max_concurrent_stages: AtomicU64::new(0),
            stage_stats: Mutex::new(HashMap::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    pub fn task_created(&self) {
        self.tasks_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stage_started(&self) {
        let running = self.tasks_processing.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_concurrent_stages
            .fetch_max(running, Ordering::Relaxed);
    }

    pub fn stage_completed(&self, kind: StageKind, duration: Duration) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        self.finish_stage(kind, duration, true);
    }

    pub fn stage_failed(&self, kind: StageKind, duration: Duration) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        self.finish_stage(kind, duration, false);
    }

    pub fn submission_rejected(&self) {
        self.submissions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tasks_evicted(&self, count: u64) {
        self.tasks_evicted.fetch_add(count, Ordering::Relaxed);
    }

    fn finish_stage(&self, kind: StageKind, duration: Duration, success: bool) {
        // Saturating: a reset() between start and finish must not wrap around
        let _ = self
            .tasks_processing
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });

        if let Ok(mut stats) = self.stage_stats.lock() {
            let entry = stats.entry(kind).or_default();
            entry.executions += 1;
            if !success {
                entry.failures += 1;
            }
            entry.last_execution = current_timestamp();
            entry.execution_times.push(duration.as_millis() as u64);
            if entry.execution_times.len() > MAX_TIMING_SAMPLES {
                entry.execution_times.remove(0);
            }
        }
    }

    // Reset all metrics (useful for testing)
    pub fn reset(&self) {
        self.tasks_created.store(0, Ordering::Relaxed);
        self.tasks_processing.store(0, Ordering::Relaxed);
        self.tasks_completed.store(0, Ordering::Relaxed);
        self.tasks_failed.store(0, Ordering::Relaxed);
        self.submissions_rejected.store(0, Ordering::Relaxed);
        self.tasks_evicted.store(0, Ordering::Relaxed);
        self.max_concurrent_stages.store(0, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut stats) = self.stage_stats.lock() {
            stats.clear();
        }
    }

    fn stage_snapshots(&self) -> HashMap<String, StageStatsSnapshot> {
        let Ok(stats) = self.stage_stats.lock() else {
            return HashMap::new();
        };

        stats
            .iter()
            .map(|(kind, stats)| {
                let mut sorted = stats.execution_times.clone();
                sorted.sort_unstable();

                let avg = if sorted.is_empty() {
                    0.0
                } else {
                    sorted.iter().sum::<u64>() as f64 / sorted.len() as f64
                };
                let success_rate = if stats.executions == 0 {
                    0.0
                } else {
                    (stats.executions - stats.failures) as f64 / stats.executions as f64
                };

                let snapshot = StageStatsSnapshot {
                    executions: stats.executions,
                    failures: stats.failures,
                    success_rate,
                    avg_execution_time_ms: avg,
                    execution_time_p50_ms: percentile(&sorted, 50.0),
                    execution_time_p95_ms: percentile(&sorted, 95.0),
                    last_execution: stats.last_execution,
                };
                (kind.as_str().to_string(), snapshot)
            })
            .collect()
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();

        MetricsSnapshot {
            tasks: TaskMetrics {
                tasks_created: self.tasks_created.load(Ordering::Relaxed),
                tasks_processing: self.tasks_processing.load(Ordering::Relaxed),
                tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
                tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
                submissions_rejected: self.submissions_rejected.load(Ordering::Relaxed),
                tasks_evicted: self.tasks_evicted.load(Ordering::Relaxed),
                max_concurrent_stages: self.max_concurrent_stages.load(Ordering::Relaxed),
            },
            stages: self.stage_snapshots(),
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
struct StageExecutionStats {
    executions: u64,
    failures: u64,
    execution_times: Vec<u64>, // milliseconds
    last_execution: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub tasks: TaskMetrics,
    pub stages: HashMap<String, StageStatsSnapshot>,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct TaskMetrics {
    pub tasks_created: u64,
    pub tasks_processing: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub submissions_rejected: u64,
    pub tasks_evicted: u64,
    pub max_concurrent_stages: u64,
}

#[derive(Debug, Serialize)]
pub struct StageStatsSnapshot {
    pub executions: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    pub execution_time_p50_ms: f64,
    pub execution_time_p95_ms: f64,
    pub last_execution: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower = sorted_data[index.floor() as usize] as f64;
        let upper = sorted_data[index.ceil() as usize] as f64;
        lower + (upper - lower) * index.fract()
    }
}
