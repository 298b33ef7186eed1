//! Stage runner: the status-transition envelope around one stage body
//!
//! The runner owns every write to its task's record while the stage runs:
//! PROCESSING on start, progress pushes through [`ProgressReporter`], then
//! exactly one terminal write. Failures and panics inside the stage body are
//! folded into FAILED and never reach whoever scheduled the stage.

use crate::error::{sanitize_error_message, PipelineError, PipelineResult};
use crate::observability::metrics::metrics;
use crate::stage_span;
use crate::task::{StageKind, StageResult, TaskRegistry, TaskStatus, TaskUpdate};
use std::future::Future;
use std::time::Instant;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

/// Progress recorded when a stage starts
pub const INITIAL_PROGRESS: f64 = 0.1;

/// Handle a stage body uses to push intermediate progress
///
/// Updates only touch progress and message; status stays PROCESSING.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    registry: TaskRegistry,
    task_id: Uuid,
}

impl ProgressReporter {
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Returns `false` when the record has been deleted meanwhile
    pub fn report<S: Into<String>>(&self, progress: f64, message: S) -> bool {
        self.registry.update(
            self.task_id,
            TaskUpdate::new().progress(progress).message(message),
        )
    }
}

/// Aborts the stage body and fails the record if the runner is dropped mid-stage
struct CancelGuard {
    registry: TaskRegistry,
    task_id: Uuid,
    kind: StageKind,
    body: AbortHandle,
    start: Instant,
    armed: bool,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.body.abort();
        metrics().stage_failed(self.kind, self.start.elapsed());

        let written = self.registry.update(
            self.task_id,
            TaskUpdate::new()
                .status(TaskStatus::Failed)
                .message(self.kind.failure_message("stage cancelled")),
        );
        warn!(task_id = %self.task_id, recorded = written, "Stage cancelled");
    }
}

#[derive(Debug, Clone)]
pub struct StageRunner {
    registry: TaskRegistry,
}

impl StageRunner {
    pub fn new(registry: TaskRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Run `stage` in the background; the handle resolves to the terminal status
    pub fn spawn<F, Fut>(
        &self,
        task_id: Uuid,
        kind: StageKind,
        stage: F,
    ) -> JoinHandle<Option<TaskStatus>>
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = PipelineResult<StageResult>> + Send + 'static,
    {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(task_id, kind, stage).await })
    }

    /// Drive one stage to a terminal state
    ///
    /// Returns `None` when the record vanished before the stage could start
    /// or before its outcome could be written.
    pub async fn run<F, Fut>(&self, task_id: Uuid, kind: StageKind, stage: F) -> Option<TaskStatus>
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = PipelineResult<StageResult>> + Send + 'static,
    {
        let span = stage_span!(task_id = %task_id, stage = kind.as_str());
        self.run_inner(task_id, kind, stage).instrument(span).await
    }

    async fn run_inner<F, Fut>(&self, task_id: Uuid, kind: StageKind, stage: F) -> Option<TaskStatus>
    where
        F: FnOnce(ProgressReporter) -> Fut + Send + 'static,
        Fut: Future<Output = PipelineResult<StageResult>> + Send + 'static,
    {
        let started = self.registry.update(
            task_id,
            TaskUpdate::new()
                .status(TaskStatus::Processing)
                .progress(INITIAL_PROGRESS)
                .message(kind.start_message()),
        );
        if !started {
            warn!("Task disappeared before its stage started");
            return None;
        }

        info!("Stage started");
        metrics().stage_started();
        let start = Instant::now();

        let reporter = ProgressReporter {
            registry: self.registry.clone(),
            task_id,
        };

        // A nested task turns a panicking stage body into a JoinError
        let body = tokio::spawn(async move { stage(reporter).await }.in_current_span());
        let mut guard = CancelGuard {
            registry: self.registry.clone(),
            task_id,
            kind,
            body: body.abort_handle(),
            start,
            armed: true,
        };

        let joined = body.await;
        guard.armed = false;

        let outcome = match joined {
            Ok(Ok(result)) if result.stage_kind() == kind => Ok(result),
            Ok(Ok(result)) => Err(PipelineError::internal_error(format!(
                "stage returned a {} result",
                result.stage_kind().as_str()
            ))),
            Ok(Err(e)) => Err(e),
            Err(join_error) if join_error.is_panic() => {
                Err(PipelineError::stage_execution("stage panicked"))
            }
            Err(_) => Err(PipelineError::stage_execution("stage cancelled")),
        };

        let elapsed = start.elapsed();
        match outcome {
            Ok(result) => {
                metrics().stage_completed(kind, elapsed);
                let written = self.registry.update(
                    task_id,
                    TaskUpdate::new()
                        .status(TaskStatus::Completed)
                        .progress(1.0)
                        .message(kind.success_message())
                        .result(result),
                );
                info!(duration_ms = elapsed.as_millis() as u64, "Stage completed");
                written.then_some(TaskStatus::Completed)
            }
            Err(e) => {
                metrics().stage_failed(kind, elapsed);
                let message = sanitize_error_message(&kind.failure_message(&e.to_string()));
                error!(
                    duration_ms = elapsed.as_millis() as u64,
                    error = %message,
                    "Stage failed"
                );
                let written = self.registry.update(
                    task_id,
                    TaskUpdate::new().status(TaskStatus::Failed).message(message),
                );
                written.then_some(TaskStatus::Failed)
            }
        }
    }
}
