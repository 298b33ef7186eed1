//! Request handlers
//!
//! Each handler answers with a ready-made response so every route shares
//! one extract type and the filters can be unified.

use super::error::ApiError;
use crate::observability::metrics::metrics;
use crate::pipeline::PipelineService;
use crate::task::{StageKind, StageResult, TaskRecord, TaskRegistry, TaskStatus};
use bytes::BytesMut;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::io::ErrorKind;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info};
use uuid::Uuid;
use warp::http::{header, StatusCode};
use warp::hyper::Body;
use warp::reply::{Reply, Response};

/// Read size for streamed downloads
const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
pub struct SegmentationRequest {
    pub upload_id: String,
}

#[derive(Debug, Deserialize)]
pub struct FeatureRequest {
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ReportSubmitRequest {
    pub features_task_id: String,
    #[serde(default)]
    pub patient_info: Option<serde_json::Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

fn respond(result: Result<Response, ApiError>) -> Result<Response, Infallible> {
    Ok(result.unwrap_or_else(ApiError::into_response))
}

fn json_ok<T: serde::Serialize>(value: &T) -> Response {
    warp::reply::json(value).into_response()
}

/// Ids that do not parse can never name a task
fn lookup_task(registry: &TaskRegistry, task_id: &str) -> Result<TaskRecord, ApiError> {
    Uuid::parse_str(task_id)
        .ok()
        .and_then(|id| registry.get(id))
        .ok_or_else(|| ApiError::not_found("Task not found"))
}

pub async fn submit_segmentation(
    request: SegmentationRequest,
    service: PipelineService,
) -> Result<Response, Infallible> {
    let result = service
        .submit_segmentation(&request.upload_id)
        .await
        .map(|submission| json_ok(&submission))
        .map_err(ApiError::from);
    respond(result)
}

pub async fn submit_feature_extraction(
    request: FeatureRequest,
    service: PipelineService,
) -> Result<Response, Infallible> {
    let Ok(segmentation_task_id) = Uuid::parse_str(&request.task_id) else {
        metrics().submission_rejected();
        return respond(Err(ApiError::not_found("Segmentation task not found")));
    };

    let result = service
        .submit_feature_extraction(segmentation_task_id)
        .await
        .map(|submission| json_ok(&submission))
        .map_err(ApiError::from);
    respond(result)
}

pub async fn submit_report(
    request: ReportSubmitRequest,
    service: PipelineService,
) -> Result<Response, Infallible> {
    let Ok(features_task_id) = Uuid::parse_str(&request.features_task_id) else {
        metrics().submission_rejected();
        return respond(Err(ApiError::not_found("Features task not found")));
    };

    let result = service
        .submit_report(features_task_id, request.patient_info)
        .await
        .map(|submission| json_ok(&submission))
        .map_err(ApiError::from);
    respond(result)
}

pub async fn task_status(task_id: String, registry: TaskRegistry) -> Result<Response, Infallible> {
    respond(lookup_task(&registry, &task_id).map(|record| json_ok(&record)))
}

pub async fn list_tasks(query: ListQuery, registry: TaskRegistry) -> Result<Response, Infallible> {
    let kind = match query.kind.as_deref() {
        None => None,
        Some(name) => match StageKind::parse(name) {
            Some(kind) => Some(kind),
            None => {
                return respond(Err(ApiError::bad_request(format!(
                    "Unknown task type: {name}"
                ))))
            }
        },
    };

    let tasks = registry.list(kind);
    respond(Ok(json_ok(&json!({ "total": tasks.len(), "tasks": tasks }))))
}

pub async fn delete_task(task_id: String, registry: TaskRegistry) -> Result<Response, Infallible> {
    let deleted = Uuid::parse_str(&task_id)
        .ok()
        .map(|id| registry.delete(id))
        .unwrap_or(false);

    if deleted {
        info!(task_id = %task_id, "Task deleted over HTTP");
        respond(Ok(json_ok(&json!({ "message": "Task deleted" }))))
    } else {
        respond(Err(ApiError::not_found("Task not found")))
    }
}

/// Attachment name and content type of a stage's downloadable artifact
pub fn download_spec(kind: StageKind, task_id: &str) -> Option<(String, &'static str)> {
    match kind {
        StageKind::Segmentation => {
            Some((format!("segmentation_{task_id}.nii.gz"), "application/gzip"))
        }
        StageKind::FeatureExtraction => {
            Some((format!("clinical_features_{task_id}.csv"), "text/csv"))
        }
        StageKind::ReportGeneration => Some((
            format!("brain_tumor_comprehensive_report_{task_id}.pdf"),
            "application/pdf",
        )),
        StageKind::Upload => None,
    }
}

async fn read_artifact(kind: StageKind, record: &TaskRecord) -> Result<Response, ApiError> {
    if record.kind != kind {
        return Err(ApiError::not_found("Task not found"));
    }
    if record.status != TaskStatus::Completed {
        return Err(ApiError::bad_request("Task not completed yet"));
    }
    let path = record
        .result
        .as_ref()
        .map(StageResult::artifact_path)
        .ok_or_else(|| ApiError::internal("No output file available"))?;
    let (filename, content_type) = download_spec(kind, &record.id.to_string())
        .ok_or_else(|| ApiError::not_found("Task not found"))?;

    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ApiError::not_found("Output file not found"));
        }
        Err(e) => {
            error!(task_id = %record.id, error = %e, "Failed to open artifact");
            return Err(ApiError::internal("Failed to read output file"));
        }
    };
    let length = file
        .metadata()
        .await
        .map_err(|e| {
            error!(task_id = %record.id, error = %e, "Failed to stat artifact");
            ApiError::internal("Failed to read output file")
        })?
        .len();

    warp::http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, length)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        )
        .body(stream_file(file, record.id))
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// Body fed from `file` in fixed-size chunks by a background task
fn stream_file(mut file: File, task_id: Uuid) -> Body {
    let (mut sender, body) = Body::channel();
    tokio::spawn(async move {
        let mut buf = BytesMut::with_capacity(DOWNLOAD_CHUNK_SIZE);
        loop {
            buf.reserve(DOWNLOAD_CHUNK_SIZE);
            match file.read_buf(&mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    if sender.send_data(buf.split().freeze()).await.is_err() {
                        debug!(task_id = %task_id, "Client went away mid-download");
                        break;
                    }
                }
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Artifact read failed mid-download");
                    sender.abort();
                    break;
                }
            }
        }
    });
    body
}

pub async fn download(
    kind: StageKind,
    task_id: String,
    registry: TaskRegistry,
) -> Result<Response, Infallible> {
    let result = match lookup_task(&registry, &task_id) {
        Ok(record) => read_artifact(kind, &record).await,
        Err(e) => Err(e),
    };
    respond(result)
}

pub async fn report_preview(
    task_id: String,
    registry: TaskRegistry,
) -> Result<Response, Infallible> {
    let result = lookup_task(&registry, &task_id).and_then(|record| {
        if record.status != TaskStatus::Completed {
            return Err(ApiError::bad_request("Task not completed yet"));
        }
        let report_data = match record.result {
            Some(StageResult::Report(report)) => report.report_data,
            _ => Default::default(),
        };
        let field = |name: &str, default: Value| report_data.get(name).cloned().unwrap_or(default);

        Ok(json_ok(&json!({
            "task_id": task_id,
            "report_text": field("report_text", json!("")),
            "visualizations": field("visualizations", json!({})),
            "features": field("features", json!({})),
            "generated_at": field("generated_at", json!("")),
            "model_used": field("model_used", json!("")),
        })))
    });
    respond(result)
}

pub async fn health(registry: TaskRegistry) -> Result<Response, Infallible> {
    Ok(json_ok(&json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "tasks": registry.len(),
    })))
}

pub async fn metrics_snapshot() -> Result<Response, Infallible> {
    Ok(json_ok(&metrics().get_metrics()))
}
