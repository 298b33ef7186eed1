//! Typed result payloads, one variant per stage kind
//!
//! Large artifacts are referenced by path only. Their content belongs to
//! the storage collaborator that produced them.

use super::record::StageKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A single clinical feature value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Number(n) => write!(f, "{n}"),
            FeatureValue::Flag(b) => write!(f, "{b}"),
            FeatureValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for FeatureValue {
    fn from(value: f64) -> Self {
        FeatureValue::Number(value)
    }
}

impl From<bool> for FeatureValue {
    fn from(value: bool) -> Self {
        FeatureValue::Flag(value)
    }
}

impl From<&str> for FeatureValue {
    fn from(value: &str) -> Self {
        FeatureValue::Text(value.to_string())
    }
}

impl From<String> for FeatureValue {
    fn from(value: String) -> Self {
        FeatureValue::Text(value)
    }
}

/// Named feature table, ordered by feature name
pub type FeatureTable = BTreeMap<String, FeatureValue>;

/// Free-form report payload produced by the report collaborator
pub type ReportData = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationResult {
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualizations: Option<BTreeMap<String, PathBuf>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureResult {
    pub features: FeatureTable,
    pub output_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation_task_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportResult {
    pub report_data: ReportData,
    pub pdf_path: PathBuf,
}

/// Result payload attached to a COMPLETED task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageResult {
    Segmentation(SegmentationResult),
    Features(FeatureResult),
    Report(ReportResult),
}

impl StageResult {
    /// Stage kind that produces this variant
    pub fn stage_kind(&self) -> StageKind {
        match self {
            StageResult::Segmentation(_) => StageKind::Segmentation,
            StageResult::Features(_) => StageKind::FeatureExtraction,
            StageResult::Report(_) => StageKind::ReportGeneration,
        }
    }

    /// Primary downloadable artifact
    pub fn artifact_path(&self) -> &Path {
        match self {
            StageResult::Segmentation(r) => &r.output_path,
            StageResult::Features(r) => &r.output_path,
            StageResult::Report(r) => &r.pdf_path,
        }
    }

    /// Upload reference recorded in the payload, if any
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            StageResult::Segmentation(r) => r.upload_id.as_deref(),
            _ => None,
        }
    }

    /// Segmentation task reference recorded in the payload, if any
    pub fn segmentation_task_id(&self) -> Option<Uuid> {
        match self {
            StageResult::Features(r) => r.segmentation_task_id,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feature_values_deserialize_from_scalars() {
        let table: FeatureTable = serde_json::from_value(json!({
            "whole_tumor_volume_cm3": 42.5,
            "has_necrosis": true,
            "hemisphere": "left"
        }))
        .unwrap();

        assert_eq!(table["whole_tumor_volume_cm3"], FeatureValue::Number(42.5));
        assert_eq!(table["has_necrosis"], FeatureValue::Flag(true));
        assert_eq!(table["hemisphere"], FeatureValue::Text("left".to_string()));
    }

    #[test]
    fn test_result_is_tagged_by_kind() {
        let result = StageResult::Report(ReportResult {
            report_data: ReportData::new(),
            pdf_path: PathBuf::from("/r/report.pdf"),
        });
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["kind"], "report");
        assert_eq!(json["pdf_path"], "/r/report.pdf");
    }

    #[test]
    fn test_untagged_payload_is_rejected() {
        let parsed: Result<StageResult, _> =
            serde_json::from_value(json!({"output_path": "/x/seg.bin"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_artifact_path_per_variant() {
        let seg = StageResult::Segmentation(SegmentationResult {
            output_path: PathBuf::from("/o/seg.nii.gz"),
            upload_id: Some("u1".to_string()),
            visualizations: None,
        });
        assert_eq!(seg.artifact_path(), Path::new("/o/seg.nii.gz"));
        assert_eq!(seg.upload_id(), Some("u1"));
        assert_eq!(seg.stage_kind(), StageKind::Segmentation);
        assert_eq!(seg.segmentation_task_id(), None);

        let seg_id = Uuid::new_v4();
        let features = StageResult::Features(FeatureResult {
            features: FeatureTable::new(),
            output_path: PathBuf::from("/o/f.csv"),
            segmentation_task_id: Some(seg_id),
        });
        assert_eq!(features.artifact_path(), Path::new("/o/f.csv"));
        assert_eq!(features.segmentation_task_id(), Some(seg_id));
        assert_eq!(features.upload_id(), None);
    }

    #[test]
    fn test_feature_value_display() {
        assert_eq!(FeatureValue::from(1.5).to_string(), "1.5");
        assert_eq!(FeatureValue::from(false).to_string(), "false");
        assert_eq!(FeatureValue::from("frontal").to_string(), "frontal");
    }
}
