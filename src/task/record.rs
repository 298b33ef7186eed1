//! Task record data model and status transitions

use super::result::StageResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle status of a task record
///
/// PENDING -> PROCESSING -> {COMPLETED | FAILED}. The two terminal states
/// accept no further transitions by contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage a task belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Upload,
    Segmentation,
    FeatureExtraction,
    ReportGeneration,
}

impl StageKind {
    /// Wire name, as used in the `task_type` field
    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Upload => "upload",
            StageKind::Segmentation => "segmentation",
            StageKind::FeatureExtraction => "feature_extraction",
            StageKind::ReportGeneration => "report_generation",
        }
    }

    /// Parse the wire name back into a kind
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(StageKind::Upload),
            "segmentation" => Some(StageKind::Segmentation),
            "feature_extraction" => Some(StageKind::FeatureExtraction),
            "report_generation" => Some(StageKind::ReportGeneration),
            _ => None,
        }
    }

    /// Human-readable label used in status messages
    pub fn label(self) -> &'static str {
        match self {
            StageKind::Upload => "Upload",
            StageKind::Segmentation => "Segmentation",
            StageKind::FeatureExtraction => "Feature extraction",
            StageKind::ReportGeneration => "Report generation",
        }
    }

    pub fn start_message(self) -> &'static str {
        match self {
            StageKind::Upload => "Processing upload...",
            StageKind::Segmentation => "Starting segmentation...",
            StageKind::FeatureExtraction => "Starting feature extraction...",
            StageKind::ReportGeneration => "Starting comprehensive report generation...",
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            StageKind::Upload => "Upload processed successfully",
            StageKind::Segmentation => "Segmentation completed successfully",
            StageKind::FeatureExtraction => "Feature extraction completed successfully",
            StageKind::ReportGeneration => "Comprehensive report generation completed successfully",
        }
    }

    /// Message recorded on FAILED, built from the underlying cause
    pub fn failure_message(self, cause: &str) -> String {
        format!("{} failed: {cause}", self.label())
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stage-specific cross references recorded at creation time
///
/// The registry stores these verbatim. A reference to another task says
/// nothing about whether that task still exists or ever completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskLinks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features_task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient_info: Option<serde_json::Map<String, serde_json::Value>>,
}

impl TaskLinks {
    pub fn upload<S: Into<String>>(upload_id: S) -> Self {
        Self {
            upload_id: Some(upload_id.into()),
            ..Default::default()
        }
    }

    pub fn segmentation(task_id: Uuid) -> Self {
        Self {
            segmentation_task_id: Some(task_id),
            ..Default::default()
        }
    }

    pub fn features(
        task_id: Uuid,
        patient_info: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> Self {
        Self {
            features_task_id: Some(task_id),
            patient_info,
            ..Default::default()
        }
    }
}

/// One unit of work tracked by the registry
///
/// Serialized shape is what status pollers see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(rename = "task_id")]
    pub id: Uuid,
    #[serde(rename = "task_type")]
    pub kind: StageKind,
    pub status: TaskStatus,
    pub progress: f64,
    pub message: String,
    pub result: Option<StageResult>,
    #[serde(flatten)]
    pub links: TaskLinks,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub(crate) fn new(kind: StageKind, links: TaskLinks) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            status: TaskStatus::Pending,
            progress: 0.0,
            message: "Task created".to_string(),
            result: None,
            links,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update; only provided fields change
    pub(crate) fn apply(&mut self, update: TaskUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(progress) = update.progress {
            if progress.is_finite() {
                self.progress = progress.clamp(0.0, 1.0);
            }
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(result) = update.result {
            self.result = Some(result);
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update applied atomically by [`TaskRegistry::update`](super::TaskRegistry::update)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub result: Option<StageResult>,
}

impl TaskUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn result(mut self, result: StageResult) -> Self {
        self.result = Some(result);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::result::SegmentationResult;
    use std::path::PathBuf;

    #[test]
    fn test_new_record_defaults() {
        let record = TaskRecord::new(StageKind::Segmentation, TaskLinks::upload("up-1"));
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0.0);
        assert_eq!(record.message, "Task created");
        assert!(record.result.is_none());
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.links.upload_id.as_deref(), Some("up-1"));
    }

    #[test]
    fn test_apply_only_changes_provided_fields() {
        let mut record = TaskRecord::new(StageKind::Segmentation, TaskLinks::default());
        record.apply(TaskUpdate::new().progress(0.4));

        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.progress, 0.4);
        assert_eq!(record.message, "Task created");
    }

    #[test]
    fn test_apply_clamps_progress() {
        let mut record = TaskRecord::new(StageKind::Segmentation, TaskLinks::default());
        record.apply(TaskUpdate::new().progress(1.7));
        assert_eq!(record.progress, 1.0);

        record.apply(TaskUpdate::new().progress(-0.2));
        assert_eq!(record.progress, 0.0);

        record.apply(TaskUpdate::new().progress(f64::NAN));
        assert_eq!(record.progress, 0.0);
    }

    #[test]
    fn test_apply_refreshes_updated_at() {
        let mut record = TaskRecord::new(StageKind::Segmentation, TaskLinks::default());
        let before = record.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        record.apply(TaskUpdate::new());
        assert!(record.updated_at > before);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_stage_kind_wire_names_round_trip() {
        for kind in [
            StageKind::Upload,
            StageKind::Segmentation,
            StageKind::FeatureExtraction,
            StageKind::ReportGeneration,
        ] {
            assert_eq!(StageKind::parse(kind.as_str()), Some(kind));
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, serde_json::json!(kind.as_str()));
        }
        assert_eq!(StageKind::parse("segmentation_v2"), None);
    }

    #[test]
    fn test_failure_message_uses_label() {
        assert_eq!(
            StageKind::FeatureExtraction.failure_message("boom"),
            "Feature extraction failed: boom"
        );
    }

    #[test]
    fn test_record_serializes_polling_shape() {
        let mut record = TaskRecord::new(StageKind::Segmentation, TaskLinks::upload("up-9"));
        record.apply(
            TaskUpdate::new()
                .status(TaskStatus::Completed)
                .progress(1.0)
                .result(StageResult::Segmentation(SegmentationResult {
                    output_path: PathBuf::from("/x/seg.bin"),
                    upload_id: Some("up-9".to_string()),
                    visualizations: None,
                })),
        );

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["task_id"], serde_json::json!(record.id.to_string()));
        assert_eq!(json["task_type"], "segmentation");
        assert_eq!(json["status"], "completed");
        assert_eq!(json["upload_id"], "up-9");
        assert_eq!(json["result"]["kind"], "segmentation");
        assert_eq!(json["result"]["output_path"], "/x/seg.bin");
        assert!(json.get("features_task_id").is_none());
    }
}
