//! Submission and launch of the three pipeline stages
//!
//! `submit_*` runs the synchronous fast-fail checks, creates the record,
//! schedules the stage and returns without waiting for it. `launch_*`
//! schedules the stage body for a record that already exists; the body
//! re-validates its upstream itself, since the upstream may have been
//! deleted between submission and start.

use super::resolver::{upload_link, ChainResolver};
use super::runner::{ProgressReporter, StageRunner};
use crate::error::{PipelineError, PipelineResult};
use crate::observability::metrics::metrics;
use crate::stages::{ReportRequest, StageSet};
use crate::storage::{ArtifactStore, UploadFiles};
use crate::task::{
    FeatureResult, ReportResult, SegmentationResult, StageKind, StageResult, TaskLinks,
    TaskRecord, TaskRegistry, TaskStatus,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Directories the service writes stage artifacts into
#[derive(Debug, Clone, PartialEq)]
pub struct OutputPaths {
    pub output_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl OutputPaths {
    pub fn new<P: Into<PathBuf>, R: Into<PathBuf>>(output_dir: P, reports_dir: R) -> Self {
        Self {
            output_dir: output_dir.into(),
            reports_dir: reports_dir.into(),
        }
    }

    pub fn features_csv(&self, task_id: Uuid) -> PathBuf {
        self.output_dir.join(format!("{task_id}_features.csv"))
    }

    pub fn report_pdf(&self, task_id: Uuid) -> PathBuf {
        self.reports_dir
            .join(format!("{task_id}_comprehensive_report.pdf"))
    }
}

/// Immediate answer to a submission; the stage itself runs in the background
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Submission {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub message: String,
}

impl Submission {
    fn pending<S: Into<String>>(task_id: Uuid, message: S) -> Self {
        Self {
            task_id,
            status: TaskStatus::Pending,
            message: message.into(),
        }
    }
}

#[derive(Clone)]
pub struct PipelineService {
    registry: TaskRegistry,
    runner: StageRunner,
    resolver: ChainResolver,
    store: Arc<dyn ArtifactStore>,
    stages: StageSet,
    paths: OutputPaths,
}

impl PipelineService {
    pub fn new(
        registry: TaskRegistry,
        store: Arc<dyn ArtifactStore>,
        stages: StageSet,
        paths: OutputPaths,
    ) -> Self {
        Self {
            runner: StageRunner::new(registry.clone()),
            resolver: ChainResolver::new(registry.clone()),
            registry,
            store,
            stages,
            paths,
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &ChainResolver {
        &self.resolver
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    fn reject<T>(&self, error: PipelineError) -> PipelineResult<T> {
        metrics().submission_rejected();
        warn!(error = %error, "Submission rejected");
        Err(error)
    }

    fn own_record(&self, task_id: Uuid) -> PipelineResult<TaskRecord> {
        self.registry
            .get(task_id)
            .ok_or_else(|| PipelineError::internal_error(format!("task {task_id} vanished")))
    }

    pub async fn submit_segmentation(&self, upload_id: &str) -> PipelineResult<Submission> {
        if self.store.lookup(upload_id).await.is_none() {
            return self.reject(PipelineError::upload_not_found(upload_id));
        }

        let task_id = self
            .registry
            .create(StageKind::Segmentation, TaskLinks::upload(upload_id));
        self.launch_segmentation(task_id);

        info!(task_id = %task_id, upload_id, "Segmentation submitted");
        Ok(Submission::pending(task_id, "Segmentation task started"))
    }

    pub async fn submit_feature_extraction(
        &self,
        segmentation_task_id: Uuid,
    ) -> PipelineResult<Submission> {
        if let Err(e) = self
            .resolver
            .require_completed(segmentation_task_id, StageKind::Segmentation)
        {
            return self.reject(e);
        }

        let task_id = self.registry.create(
            StageKind::FeatureExtraction,
            TaskLinks::segmentation(segmentation_task_id),
        );
        self.launch_feature_extraction(task_id);

        info!(task_id = %task_id, segmentation_task_id = %segmentation_task_id, "Feature extraction submitted");
        Ok(Submission::pending(task_id, "Feature extraction task started"))
    }

    pub async fn submit_report(
        &self,
        features_task_id: Uuid,
        patient_info: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> PipelineResult<Submission> {
        if let Err(e) = self
            .resolver
            .require_completed(features_task_id, StageKind::FeatureExtraction)
        {
            return self.reject(e);
        }

        let task_id = self.registry.create(
            StageKind::ReportGeneration,
            TaskLinks::features(features_task_id, patient_info),
        );
        self.launch_report(task_id);

        info!(task_id = %task_id, features_task_id = %features_task_id, "Report generation submitted");
        Ok(Submission::pending(
            task_id,
            "Comprehensive report generation task started",
        ))
    }

    /// Schedule segmentation for an existing record carrying an upload link
    pub fn launch_segmentation(&self, task_id: Uuid) -> JoinHandle<Option<TaskStatus>> {
        let service = self.clone();
        self.runner
            .spawn(task_id, StageKind::Segmentation, move |reporter| async move {
                service.run_segmentation(reporter).await
            })
    }

    /// Schedule feature extraction for an existing record carrying a segmentation link
    pub fn launch_feature_extraction(&self, task_id: Uuid) -> JoinHandle<Option<TaskStatus>> {
        let service = self.clone();
        self.runner.spawn(
            task_id,
            StageKind::FeatureExtraction,
            move |reporter| async move { service.run_feature_extraction(reporter).await },
        )
    }

    /// Schedule report generation for an existing record carrying a features link
    pub fn launch_report(&self, task_id: Uuid) -> JoinHandle<Option<TaskStatus>> {
        let service = self.clone();
        self.runner
            .spawn(task_id, StageKind::ReportGeneration, move |reporter| async move {
                service.run_report(reporter).await
            })
    }

    async fn run_segmentation(&self, reporter: ProgressReporter) -> PipelineResult<StageResult> {
        let task_id = reporter.task_id();
        let record = self.own_record(task_id)?;
        let upload_id = upload_link(&record)
            .ok_or_else(|| PipelineError::internal_error("task has no upload reference"))?;

        let files = self
            .store
            .lookup(&upload_id)
            .await
            .ok_or_else(|| PipelineError::upload_not_found(upload_id.as_str()))?;

        reporter.report(0.5, "Running model prediction...");
        let output = self.stages.segmentation.predict(&files, task_id).await?;

        Ok(StageResult::Segmentation(SegmentationResult {
            output_path: output.output_path,
            upload_id: Some(upload_id),
            visualizations: output.visualizations,
        }))
    }

    async fn run_feature_extraction(
        &self,
        reporter: ProgressReporter,
    ) -> PipelineResult<StageResult> {
        let task_id = reporter.task_id();
        let record = self.own_record(task_id)?;
        let segmentation_task_id = record.links.segmentation_task_id.ok_or_else(|| {
            PipelineError::internal_error("task has no segmentation reference")
        })?;

        let segmentation = self.resolver.resolve_segmentation(segmentation_task_id)?;
        let upload_id = segmentation
            .upload_id
            .ok_or_else(|| PipelineError::stage_execution("Cannot find original upload files"))?;
        let files = self
            .store
            .lookup(&upload_id)
            .await
            .ok_or_else(|| PipelineError::stage_execution("Original files not found"))?;

        reporter.report(0.5, "Extracting features...");
        let case_id = format!("case_{task_id}");
        let features = self
            .stages
            .features
            .extract_features(&files, &segmentation.output_path, &case_id)
            .await?;

        let output_path = self.paths.features_csv(task_id);
        self.stages
            .features
            .save_features(&features, &output_path)
            .await?;

        Ok(StageResult::Features(FeatureResult {
            features,
            output_path,
            segmentation_task_id: Some(segmentation_task_id),
        }))
    }

    async fn run_report(&self, reporter: ProgressReporter) -> PipelineResult<StageResult> {
        let task_id = reporter.task_id();
        let record = self.own_record(task_id)?;
        let features_task_id = record
            .links
            .features_task_id
            .ok_or_else(|| PipelineError::internal_error("task has no features reference"))?;

        let features = self.resolver.resolve_features(features_task_id)?;
        let context = self.resolver.resolve_report_context(&features);
        let files: Option<UploadFiles> = match context.upload_id.as_deref() {
            Some(upload_id) => self.store.lookup(upload_id).await,
            None => None,
        };

        reporter.report(0.3, "Generating AI report with visualizations...");
        let request = ReportRequest {
            task_id,
            features: features.features,
            patient_info: record.links.patient_info.unwrap_or_default(),
            files,
            segmentation_path: context.segmentation_path,
        };
        let report_data = self.stages.reports.generate_report(&request).await?;

        reporter.report(0.7, "Creating enhanced PDF report...");
        let pdf_path = self.paths.report_pdf(task_id);
        self.stages
            .reports
            .render_pdf(&report_data, &pdf_path)
            .await?;

        Ok(StageResult::Report(ReportResult {
            report_data,
            pdf_path,
        }))
    }
}
