//! Chain resolver: validated access to an upstream task's result
//!
//! Every downstream stage goes through here before touching upstream output.
//! Resolution never waits: an upstream that is not COMPLETED right now is a
//! hard failure, whether it is still running or already failed.

use crate::error::{PipelineError, PipelineResult};
use crate::task::{FeatureTable, StageKind, StageResult, TaskRecord, TaskRegistry, TaskStatus};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

/// Fields a feature-extraction stage needs from its segmentation upstream
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationInputs {
    pub task_id: Uuid,
    pub output_path: PathBuf,
    pub upload_id: Option<String>,
}

/// Fields a report stage needs from its feature-extraction upstream
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureInputs {
    pub task_id: Uuid,
    pub features: FeatureTable,
    pub output_path: PathBuf,
    pub segmentation_task_id: Option<Uuid>,
}

/// Transitive context behind a feature task; any part may be missing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportContext {
    pub segmentation_path: Option<PathBuf>,
    pub upload_id: Option<String>,
}

/// Upload reference of a task: result payload first, creation links second
pub fn upload_link(record: &TaskRecord) -> Option<String> {
    record
        .result
        .as_ref()
        .and_then(StageResult::upload_id)
        .map(str::to_string)
        .or_else(|| record.links.upload_id.clone())
}

/// Segmentation reference of a task: result payload first, creation links second
pub fn segmentation_link(record: &TaskRecord) -> Option<Uuid> {
    record
        .result
        .as_ref()
        .and_then(StageResult::segmentation_task_id)
        .or(record.links.segmentation_task_id)
}

#[derive(Debug, Clone)]
pub struct ChainResolver {
    registry: TaskRegistry,
}

impl ChainResolver {
    pub fn new(registry: TaskRegistry) -> Self {
        Self { registry }
    }

    /// Snapshot of `task_id`, provided it exists and is COMPLETED
    pub fn require_completed(&self, task_id: Uuid, stage: StageKind) -> PipelineResult<TaskRecord> {
        let record = self
            .registry
            .get(task_id)
            .ok_or_else(|| PipelineError::upstream_not_found(stage, task_id))?;

        if record.status != TaskStatus::Completed {
            return Err(PipelineError::upstream_not_ready(stage, task_id, record.status));
        }
        Ok(record)
    }

    pub fn resolve_segmentation(&self, task_id: Uuid) -> PipelineResult<SegmentationInputs> {
        let record = self.require_completed(task_id, StageKind::Segmentation)?;
        let upload_id = upload_link(&record);

        match record.result {
            Some(StageResult::Segmentation(result)) => Ok(SegmentationInputs {
                task_id,
                output_path: result.output_path,
                upload_id,
            }),
            _ => Err(PipelineError::upstream_malformed(
                task_id,
                "No segmentation output found in task result",
            )),
        }
    }

    pub fn resolve_features(&self, task_id: Uuid) -> PipelineResult<FeatureInputs> {
        let record = self.require_completed(task_id, StageKind::FeatureExtraction)?;
        let segmentation_task_id = segmentation_link(&record);

        match record.result {
            // An empty table is a valid extraction outcome, not a malformed one
            Some(StageResult::Features(result)) => Ok(FeatureInputs {
                task_id,
                features: result.features,
                output_path: result.output_path,
                segmentation_task_id,
            }),
            _ => Err(PipelineError::upstream_malformed(
                task_id,
                "No features found in task result",
            )),
        }
    }

    /// Follow features -> segmentation -> upload as far as the chain allows
    pub fn resolve_report_context(&self, features: &FeatureInputs) -> ReportContext {
        let Some(segmentation_id) = features.segmentation_task_id else {
            debug!(features_task_id = %features.task_id, "No segmentation link recorded");
            return ReportContext::default();
        };

        match self.resolve_segmentation(segmentation_id) {
            Ok(inputs) => ReportContext {
                segmentation_path: Some(inputs.output_path),
                upload_id: inputs.upload_id,
            },
            Err(e) => {
                debug!(
                    segmentation_task_id = %segmentation_id,
                    error = %e,
                    "Segmentation context unavailable"
                );
                ReportContext::default()
            }
        }
    }
}
