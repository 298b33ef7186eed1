//! Stage collaborators
//!
//! The numeric and rendering work of each pipeline stage lives outside this
//! crate. These traits are the seam: the pipeline service calls them from
//! inside the stage runner and never looks past the returned payload.

pub mod command;

pub use command::{CommandStage, StageError};

use crate::error::StageFailure;
use crate::storage::UploadFiles;
use crate::task::{FeatureTable, ReportData};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// What the segmentation collaborator hands back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationOutput {
    pub output_path: PathBuf,
    #[serde(default)]
    pub visualizations: Option<BTreeMap<String, PathBuf>>,
}

/// Everything the report collaborator may draw on
///
/// `files` and `segmentation_path` are best-effort: they are `None` when the
/// transitive chain back to the original upload could not be followed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRequest {
    pub task_id: Uuid,
    pub features: FeatureTable,
    pub patient_info: serde_json::Map<String, serde_json::Value>,
    pub files: Option<UploadFiles>,
    pub segmentation_path: Option<PathBuf>,
}

#[async_trait]
pub trait SegmentationStage: Send + Sync {
    async fn predict(
        &self,
        files: &UploadFiles,
        task_id: Uuid,
    ) -> Result<SegmentationOutput, StageFailure>;
}

#[async_trait]
pub trait FeatureStage: Send + Sync {
    async fn extract_features(
        &self,
        files: &UploadFiles,
        segmentation_path: &Path,
        case_id: &str,
    ) -> Result<FeatureTable, StageFailure>;

    /// Persist the table; defaults to a two-row CSV (names, values)
    async fn save_features(
        &self,
        features: &FeatureTable,
        output_path: &Path,
    ) -> Result<(), StageFailure> {
        write_features_csv(features, output_path).await?;
        Ok(())
    }
}

#[async_trait]
pub trait ReportStage: Send + Sync {
    async fn generate_report(&self, request: &ReportRequest) -> Result<ReportData, StageFailure>;

    async fn render_pdf(&self, report: &ReportData, pdf_path: &Path) -> Result<(), StageFailure>;
}

/// The collaborators wired into one pipeline
#[derive(Clone)]
pub struct StageSet {
    pub segmentation: Arc<dyn SegmentationStage>,
    pub features: Arc<dyn FeatureStage>,
    pub reports: Arc<dyn ReportStage>,
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render a feature table as CSV: header row of names, one row of values
///
/// Columns follow the table's name order, not the order the collaborator
/// produced them in; stage output arrives as JSON objects, which carry no
/// ordering once parsed.
pub fn features_to_csv(features: &FeatureTable) -> String {
    let header: Vec<String> = features.keys().map(|k| csv_field(k)).collect();
    let values: Vec<String> = features
        .values()
        .map(|v| csv_field(&v.to_string()))
        .collect();
    format!("{}\n{}\n", header.join(","), values.join(","))
}

/// Write a feature table to `output_path`, creating parent directories
pub async fn write_features_csv(features: &FeatureTable, output_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(output_path, features_to_csv(features)).await
}
