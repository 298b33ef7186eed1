//! HTTP error type
//!
//! Every handler failure becomes a JSON body `{"detail": message}` with a
//! matching status code. Internal failures are logged in full and reported
//! to the caller with a generic message.

use crate::error::PipelineError;
use crate::task::StageKind;
use serde_json::json;
use std::convert::Infallible;
use thiserror::Error;
use tracing::{debug, error};
use warp::http::StatusCode;
use warp::reply::Reply;
use warp::Rejection;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    #[error("{0}")]
    Forbidden(String),

    #[error("Payload Too Large")]
    PayloadTooLarge,

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found<S: Into<String>>(message: S) -> Self {
        Self::NotFound(message.into())
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn into_response(self) -> warp::reply::Response {
        let status = self.status();
        warp::reply::with_status(warp::reply::json(&json!({ "detail": self.to_string() })), status)
            .into_response()
    }
}

/// Subject of "... task not found" submission errors
fn missing_label(stage: StageKind) -> &'static str {
    match stage {
        StageKind::FeatureExtraction => "Features",
        other => other.label(),
    }
}

/// Subject of "... not completed yet" submission errors
fn pending_label(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Segmentation => "Segmentation task",
        other => other.label(),
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UploadNotFound { .. } => {
                ApiError::not_found("Upload not found or incomplete")
            }
            PipelineError::UpstreamNotFound { stage, .. } => {
                ApiError::not_found(format!("{} task not found", missing_label(stage)))
            }
            PipelineError::UpstreamNotReady { stage, .. } => {
                ApiError::bad_request(format!("{} not completed yet", pending_label(stage)))
            }
            PipelineError::UpstreamResultMalformed { message, .. } => ApiError::bad_request(message),
            other => {
                error!(error = %other, "Pipeline error while handling request");
                ApiError::internal("Internal server error")
            }
        }
    }
}

/// Turn warp rejections into `{"detail": ...}` responses
pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    let api_error = if err.is_not_found() {
        ApiError::not_found("Not Found")
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        ApiError::bad_request(e.to_string())
    } else if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        ApiError::bad_request(e.to_string())
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        ApiError::bad_request("Content-Length header is required")
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        ApiError::bad_request("Request body must be JSON")
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        ApiError::PayloadTooLarge
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        ApiError::MethodNotAllowed
    } else if let Some(e) = err.find::<warp::cors::CorsForbidden>() {
        ApiError::Forbidden(e.to_string())
    } else {
        error!(rejection = ?err, "Unhandled rejection");
        ApiError::internal("Internal server error")
    };

    debug!(status = %api_error.status(), detail = %api_error, "Request rejected");
    Ok(api_error.into_response())
}
