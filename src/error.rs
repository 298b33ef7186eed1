//! Error taxonomy for the task orchestration engine
//!
//! Every failure a stage can hit ends up here before it is folded into the
//! FAILED state of a task record. Nothing in this module is ever returned to
//! the caller that scheduled the stage; the scheduling side only sees the
//! fast-fail checks done during submission.

use crate::task::{StageKind, TaskStatus};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use thiserror::Error;
use uuid::Uuid;

/// Boxed failure returned by stage collaborators
pub type StageFailure = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for pipeline operations
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} task {task_id} not found")]
    UpstreamNotFound { stage: StageKind, task_id: Uuid },

    #[error("{stage} task {task_id} not completed (status: {status})")]
    UpstreamNotReady {
        stage: StageKind,
        task_id: Uuid,
        status: TaskStatus,
    },

    #[error("{message}")]
    UpstreamResultMalformed { task_id: Uuid, message: String },

    #[error("Upload {upload_id} not found or incomplete")]
    UploadNotFound { upload_id: String },

    #[error("{message}")]
    StageExecution { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl PipelineError {
    /// Create upstream not found error
    pub fn upstream_not_found(stage: StageKind, task_id: Uuid) -> Self {
        Self::UpstreamNotFound { stage, task_id }
    }

    /// Create upstream not ready error
    pub fn upstream_not_ready(stage: StageKind, task_id: Uuid, status: TaskStatus) -> Self {
        Self::UpstreamNotReady {
            stage,
            task_id,
            status,
        }
    }

    /// Create malformed upstream result error
    pub fn upstream_malformed<S: Into<String>>(task_id: Uuid, message: S) -> Self {
        Self::UpstreamResultMalformed {
            task_id,
            message: message.into(),
        }
    }

    /// Create upload not found error
    pub fn upload_not_found<S: Into<String>>(upload_id: S) -> Self {
        Self::UploadNotFound {
            upload_id: upload_id.into(),
        }
    }

    /// Create stage execution error from any displayable cause
    pub fn stage_execution<E: std::fmt::Display>(cause: E) -> Self {
        Self::StageExecution {
            message: cause.to_string(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether this error came from the chain resolver
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamNotFound { .. }
                | Self::UpstreamNotReady { .. }
                | Self::UpstreamResultMalformed { .. }
        )
    }
}

impl From<StageFailure> for PipelineError {
    fn from(cause: StageFailure) -> Self {
        Self::stage_execution(cause)
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

const MAX_MESSAGE_LEN: usize = 500;

// Named credentials take `=` or `:`; a bare `key` only counts as `key=value`
static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b((?:api|access|secret|private)[_-]?key|password|passwd|token|secret)\s*[=:]\s*\S+|\b(key)=\S+",
    )
    .expect("secret pattern is valid")
});

static SENSITIVE_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("path pattern is valid")
});

/// Sanitize a failure message before it becomes visible to status pollers
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            format!("{name}=***")
        })
        .to_string();

    sanitized = SENSITIVE_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], suffix);
    }

    sanitized
}
