//! Mock implementations for testing
//!
//! Provides mock artifact store and stage collaborators so the pipeline can
//! be driven end to end without model weights or external programs.

use crate::error::StageFailure;
use crate::stages::{
    FeatureStage, ReportRequest, ReportStage, SegmentationOutput, SegmentationStage, StageSet,
};
use crate::storage::{ArtifactStore, UploadFiles, REQUIRED_MODALITIES, SCAN_EXTENSION};
use crate::task::{FeatureTable, FeatureValue, ReportData, TaskRegistry, TaskRecord};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// In-memory artifact store
#[derive(Debug, Default, Clone)]
pub struct MockArtifactStore {
    uploads: Arc<Mutex<HashMap<String, UploadFiles>>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a complete upload with all required modalities
    pub async fn add_upload(&self, upload_id: &str) -> UploadFiles {
        let files: UploadFiles = REQUIRED_MODALITIES
            .iter()
            .map(|modality| {
                (
                    modality.to_string(),
                    PathBuf::from(format!("/uploads/{upload_id}/{modality}.{SCAN_EXTENSION}")),
                )
            })
            .collect();
        self.uploads
            .lock()
            .await
            .insert(upload_id.to_string(), files.clone());
        files
    }

    pub async fn remove_upload(&self, upload_id: &str) {
        self.uploads.lock().await.remove(upload_id);
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn lookup(&self, upload_id: &str) -> Option<UploadFiles> {
        self.uploads.lock().await.get(upload_id).cloned()
    }
}

/// Segmentation stage with scripted behaviour
#[derive(Debug, Default)]
pub struct MockSegmentationStage {
    pub should_fail: bool,
    /// When set, `predict` waits for a notification before returning
    pub gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl MockSegmentationStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentationStage for MockSegmentationStage {
    async fn predict(
        &self,
        _files: &UploadFiles,
        task_id: Uuid,
    ) -> Result<SegmentationOutput, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.should_fail {
            return Err("Mock segmentation failure".into());
        }
        Ok(SegmentationOutput {
            output_path: PathBuf::from(format!("/outputs/{task_id}_segmentation.nii.gz")),
            visualizations: None,
        })
    }
}

/// Feature stage returning a fixed table; CSV is written by the default `save_features`
#[derive(Debug, Default)]
pub struct MockFeatureStage {
    pub should_fail: bool,
    pub empty_table: bool,
    calls: AtomicUsize,
}

impl MockFeatureStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    /// Succeeds with an empty feature table
    pub fn empty() -> Self {
        Self {
            empty_table: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn sample_features() -> FeatureTable {
    FeatureTable::from([
        (
            "whole_tumor_volume_cm3".to_string(),
            FeatureValue::Number(42.7),
        ),
        ("enhancing_ratio".to_string(), FeatureValue::Number(0.31)),
        (
            "hemisphere".to_string(),
            FeatureValue::Text("left".to_string()),
        ),
    ])
}

#[async_trait]
impl FeatureStage for MockFeatureStage {
    async fn extract_features(
        &self,
        _files: &UploadFiles,
        _segmentation_path: &Path,
        _case_id: &str,
    ) -> Result<FeatureTable, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err("Mock feature extraction failure".into());
        }
        if self.empty_table {
            return Ok(FeatureTable::new());
        }
        Ok(sample_features())
    }
}

/// Report stage that records its last request and writes a stub PDF
#[derive(Debug, Default)]
pub struct MockReportStage {
    pub should_fail: bool,
    last_request: Mutex<Option<ReportRequest>>,
    calls: AtomicUsize,
}

impl MockReportStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_request(&self) -> Option<ReportRequest> {
        self.last_request.lock().await.clone()
    }
}

#[async_trait]
impl ReportStage for MockReportStage {
    async fn generate_report(&self, request: &ReportRequest) -> Result<ReportData, StageFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().await = Some(request.clone());
        if self.should_fail {
            return Err("Mock report failure".into());
        }

        let mut report = ReportData::new();
        report.insert(
            "report_text".to_string(),
            json!(format!("Findings for {} features", request.features.len())),
        );
        report.insert("model_used".to_string(), json!("mock-model"));
        report.insert(
            "generated_at".to_string(),
            json!("2026-01-01T00:00:00Z"),
        );
        report.insert(
            "has_images".to_string(),
            json!(request.segmentation_path.is_some()),
        );
        Ok(report)
    }

    async fn render_pdf(&self, _report: &ReportData, pdf_path: &Path) -> Result<(), StageFailure> {
        if let Some(parent) = pdf_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(pdf_path, b"%PDF-1.4 mock").await?;
        Ok(())
    }
}

/// Bundle of mocks behind a [`StageSet`], keeping typed handles for assertions
pub struct MockStages {
    pub segmentation: Arc<MockSegmentationStage>,
    pub features: Arc<MockFeatureStage>,
    pub reports: Arc<MockReportStage>,
}

impl MockStages {
    pub fn new() -> Self {
        Self::with(
            MockSegmentationStage::new(),
            MockFeatureStage::new(),
            MockReportStage::new(),
        )
    }

    pub fn with(
        segmentation: MockSegmentationStage,
        features: MockFeatureStage,
        reports: MockReportStage,
    ) -> Self {
        Self {
            segmentation: Arc::new(segmentation),
            features: Arc::new(features),
            reports: Arc::new(reports),
        }
    }

    pub fn stage_set(&self) -> StageSet {
        StageSet {
            segmentation: self.segmentation.clone(),
            features: self.features.clone(),
            reports: self.reports.clone(),
        }
    }
}

impl Default for MockStages {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll until the task reaches a terminal state or `timeout` elapses
pub async fn wait_for_terminal(
    registry: &TaskRegistry,
    task_id: Uuid,
    timeout: Duration,
) -> Option<TaskRecord> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(record) = registry.get(task_id) {
            if record.status.is_terminal() {
                return Some(record);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
