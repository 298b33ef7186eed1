//! In-memory task registry
//!
//! Single source of truth for task records. Readers (status pollers) and
//! writers (stage runners) share one lock-guarded map; every `update` and
//! `get` runs under the lock so no caller can observe a half-applied update.
//!
//! Records are never removed automatically unless retention is configured
//! and [`TaskRegistry::evict_terminal_older_than`] is invoked. Without it the
//! registry grows with every submission.

use super::record::{StageKind, TaskLinks, TaskRecord, TaskUpdate};
use crate::observability::metrics::metrics;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Shortest period the retention sweeper runs at
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Thread-safe registry of task records
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<Uuid, TaskRecord>>>,
}

impl TaskRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // Nothing done under the write lock can panic midway through a record,
    // so a poisoned map is still consistent.
    fn read_tasks(&self) -> RwLockReadGuard<'_, HashMap<Uuid, TaskRecord>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_tasks(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, TaskRecord>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a fresh PENDING record and return its id
    pub fn create(&self, kind: StageKind, links: TaskLinks) -> Uuid {
        let record = TaskRecord::new(kind, links);
        let task_id = record.id;

        self.write_tasks().insert(task_id, record);
        metrics().task_created();

        info!(task_id = %task_id, task_type = kind.as_str(), "Created task");
        task_id
    }

    /// Apply a partial update; returns `false` when the id is unknown
    pub fn update(&self, task_id: Uuid, update: TaskUpdate) -> bool {
        let mut tasks = self.write_tasks();
        let Some(record) = tasks.get_mut(&task_id) else {
            debug!(task_id = %task_id, "Update for unknown task ignored");
            return false;
        };

        let status = update.status;
        let progress = update.progress;
        record.apply(update);

        debug!(
            task_id = %task_id,
            status = ?status,
            progress = ?progress,
            "Updated task"
        );
        true
    }

    /// Consistent snapshot of one record
    pub fn get(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.read_tasks().get(&task_id).cloned()
    }

    /// Remove a record; returns `false` when the id is unknown
    pub fn delete(&self, task_id: Uuid) -> bool {
        let removed = self.write_tasks().remove(&task_id).is_some();
        if removed {
            info!(task_id = %task_id, "Deleted task");
        }
        removed
    }

    /// Snapshots of all records, optionally filtered by kind, oldest first
    pub fn list(&self, kind: Option<StageKind>) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self
            .read_tasks()
            .values()
            .filter(|record| kind.map_or(true, |k| record.kind == k))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        records
    }

    pub fn len(&self) -> usize {
        self.read_tasks().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_tasks().is_empty()
    }

    /// Drop terminal records whose last update is older than `age`
    ///
    /// PENDING and PROCESSING records are never evicted.
    pub fn evict_terminal_older_than(&self, age: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(age) else {
            return 0;
        };
        let Some(cutoff) = Utc::now().checked_sub_signed(age) else {
            return 0;
        };

        let mut tasks = self.write_tasks();
        let before = tasks.len();
        tasks.retain(|_, record| !(record.status.is_terminal() && record.updated_at < cutoff));
        let removed = before - tasks.len();
        drop(tasks);

        if removed > 0 {
            metrics().tasks_evicted(removed as u64);
            info!(removed, "Evicted expired terminal tasks");
        }
        removed
    }

    /// Periodically evict terminal records older than `retention`
    ///
    /// `interval` is raised to [`MIN_SWEEP_INTERVAL`] when shorter.
    pub fn spawn_retention_sweeper(
        &self,
        retention: Duration,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        let interval = interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // First tick completes immediately, skip it

            loop {
                ticker.tick().await;
                let removed = registry.evict_terminal_older_than(retention);
                debug!(
                    removed,
                    remaining = registry.len(),
                    "Retention sweep finished"
                );
            }
        })
    }
}
