//! Artifact store: resolves an upload id to its set of input scans
//!
//! The core never reads scan content. It only needs to know whether an
//! upload is complete and where each modality lives.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Modality name -> file path
pub type UploadFiles = BTreeMap<String, PathBuf>;

/// Modalities an upload must contain to be usable
pub const REQUIRED_MODALITIES: [&str; 3] = ["flair", "t1ce", "t2"];

/// File extension every stored modality carries
pub const SCAN_EXTENSION: &str = "nii.gz";

/// Lookup surface of the external storage collaborator
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Resolve an upload to its input files; `None` when missing or incomplete
    async fn lookup(&self, upload_id: &str) -> Option<UploadFiles>;
}

/// Uploads stored as `<upload_dir>/<upload_id>/<modality>.nii.gz`
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    upload_dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new<P: Into<PathBuf>>(upload_dir: P) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &std::path::Path {
        &self.upload_dir
    }
}

/// Upload ids become directory names, so only plain identifiers are accepted
fn is_valid_upload_id(upload_id: &str) -> bool {
    !upload_id.is_empty()
        && upload_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn lookup(&self, upload_id: &str) -> Option<UploadFiles> {
        if !is_valid_upload_id(upload_id) {
            debug!(upload_id, "Rejected malformed upload id");
            return None;
        }

        let upload_path = self.upload_dir.join(upload_id);
        if !tokio::fs::try_exists(&upload_path).await.unwrap_or(false) {
            return None;
        }

        let mut files = UploadFiles::new();
        for modality in REQUIRED_MODALITIES {
            let file_path = upload_path.join(format!("{modality}.{SCAN_EXTENSION}"));
            if tokio::fs::try_exists(&file_path).await.unwrap_or(false) {
                files.insert(modality.to_string(), file_path);
            }
        }

        if files.len() == REQUIRED_MODALITIES.len() {
            Some(files)
        } else {
            debug!(upload_id, found = files.len(), "Upload is incomplete");
            None
        }
    }
}
