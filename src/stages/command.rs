//! Stage collaborator backed by an external program
//!
//! Each call spawns the configured command, writes one JSON request to its
//! stdin and reads one JSON document from its stdout. The request always
//! carries an `operation` field naming the stage method being invoked.

use super::{
    FeatureStage, ReportRequest, ReportStage, SegmentationOutput, SegmentationStage,
};
use crate::config::StageCommandConfig;
use crate::error::StageFailure;
use crate::storage::UploadFiles;
use crate::task::{FeatureTable, ReportData};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

/// Longest stderr excerpt kept in an error
const MAX_STDERR_LEN: usize = 400;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{stage} {operation} I/O error: {source}")]
    Io {
        stage: String,
        operation: String,
        source: std::io::Error,
    },

    #[error("{stage} {operation} exited with {status}: {stderr}")]
    NonZeroExit {
        stage: String,
        operation: String,
        status: String,
        stderr: String,
    },

    #[error("{stage} {operation} timed out after {seconds}s")]
    Timeout {
        stage: String,
        operation: String,
        seconds: u64,
    },

    #[error("{stage} {operation} produced invalid output: {source}")]
    InvalidOutput {
        stage: String,
        operation: String,
        source: serde_json::Error,
    },

    #[error("{stage} {operation} did not produce {}", path.display())]
    MissingArtifact {
        stage: String,
        operation: String,
        path: PathBuf,
    },
}

/// External program implementing one or more stage traits
#[derive(Debug, Clone)]
pub struct CommandStage {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandStage {
    pub fn new<S: Into<String>, P: Into<String>>(name: S, program: P, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn from_config<S: Into<String>>(name: S, config: &StageCommandConfig) -> Self {
        Self {
            name: name.into(),
            program: config.command.clone(),
            args: config.args.clone(),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn io_error(&self, operation: &str, source: std::io::Error) -> StageError {
        StageError::Io {
            stage: self.name.clone(),
            operation: operation.to_string(),
            source,
        }
    }

    /// Run the program once and return its raw stdout
    pub async fn run(&self, operation: &str, request: serde_json::Value) -> Result<Vec<u8>, StageError> {
        let mut payload = match request {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("request".to_string(), other);
                map
            }
        };
        payload.insert("operation".to_string(), json!(operation));
        let payload = serde_json::Value::Object(payload).to_string();

        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        debug!(stage = %self.name, operation, pid = ?child.id(), "Spawned stage command");

        // Feed stdin concurrently so a chatty child cannot deadlock on a full pipe
        let stdin = child.stdin.take();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                stdin.write_all(payload.as_bytes()).await?;
                stdin.shutdown().await?;
            }
            Ok::<_, std::io::Error>(())
        });

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result.map_err(|e| self.io_error(operation, e))?,
                Err(_) => {
                    // Dropping the wait future drops the child, which kills it
                    writer.abort();
                    return Err(StageError::Timeout {
                        stage: self.name.clone(),
                        operation: operation.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => child
                .wait_with_output()
                .await
                .map_err(|e| self.io_error(operation, e))?,
        };

        match writer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(stage = %self.name, error = %e, "Stage command closed stdin early"),
            Err(e) => warn!(stage = %self.name, error = %e, "Stdin writer task failed"),
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_LEN).collect();
            return Err(StageError::NonZeroExit {
                stage: self.name.clone(),
                operation: operation.to_string(),
                status: output.status.to_string(),
                stderr,
            });
        }

        Ok(output.stdout)
    }

    /// Run the program and parse its stdout as `T`
    pub async fn invoke<T: DeserializeOwned>(
        &self,
        operation: &str,
        request: serde_json::Value,
    ) -> Result<T, StageError> {
        let stdout = self.run(operation, request).await?;
        serde_json::from_slice(&stdout).map_err(|source| StageError::InvalidOutput {
            stage: self.name.clone(),
            operation: operation.to_string(),
            source,
        })
    }

    fn encode<T: Serialize>(value: &T) -> serde_json::Value {
        serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
    }
}

#[async_trait]
impl SegmentationStage for CommandStage {
    async fn predict(
        &self,
        files: &UploadFiles,
        task_id: Uuid,
    ) -> Result<SegmentationOutput, StageFailure> {
        let request = json!({ "files": Self::encode(files), "task_id": task_id });
        Ok(self.invoke("predict", request).await?)
    }
}

#[async_trait]
impl FeatureStage for CommandStage {
    async fn extract_features(
        &self,
        files: &UploadFiles,
        segmentation_path: &Path,
        case_id: &str,
    ) -> Result<FeatureTable, StageFailure> {
        let request = json!({
            "files": Self::encode(files),
            "segmentation_path": segmentation_path,
            "case_id": case_id,
        });
        Ok(self.invoke("extract_features", request).await?)
    }
}

#[async_trait]
impl ReportStage for CommandStage {
    async fn generate_report(&self, request: &ReportRequest) -> Result<ReportData, StageFailure> {
        Ok(self
            .invoke("generate_report", Self::encode(request))
            .await?)
    }

    async fn render_pdf(&self, report: &ReportData, pdf_path: &Path) -> Result<(), StageFailure> {
        let request = json!({ "report_data": report, "pdf_path": pdf_path });
        self.run("render_pdf", request).await?;

        if !tokio::fs::try_exists(pdf_path).await.unwrap_or(false) {
            return Err(StageError::MissingArtifact {
                stage: self.name.clone(),
                operation: "render_pdf".to_string(),
                path: pdf_path.to_path_buf(),
            }
            .into());
        }
        Ok(())
    }
}
