//! neuropipe - task orchestration for multi-stage MRI analysis
//!
//! Tracks long-running analysis tasks (segmentation, feature extraction,
//! report generation), runs each stage in the background and lets later
//! stages consume the validated output of earlier ones.
//!
//! # Overview
//!
//! - Task registry: shared, lock-guarded store of task records
//! - Stage runner: PENDING -> PROCESSING -> COMPLETED | FAILED envelope
//! - Chain resolver: checked access to an upstream task's typed result
//! - Pipeline service: fast-fail submission and background launch
//! - HTTP surface for submission, status polling and artifact download
//!
//! # Quick Start
//!
//! ```rust
//! use neuropipe::pipeline::ChainResolver;
//! use neuropipe::task::{
//!     SegmentationResult, StageKind, StageResult, TaskLinks, TaskRegistry, TaskStatus,
//!     TaskUpdate,
//! };
//! use std::path::PathBuf;
//!
//! let registry = TaskRegistry::new();
//! let segmentation = registry.create(StageKind::Segmentation, TaskLinks::upload("scan-42"));
//!
//! registry.update(
//!     segmentation,
//!     TaskUpdate::new()
//!         .status(TaskStatus::Completed)
//!         .progress(1.0)
//!         .result(StageResult::Segmentation(SegmentationResult {
//!             output_path: PathBuf::from("/x/seg.bin"),
//!             upload_id: None,
//!             visualizations: None,
//!         })),
//! );
//!
//! let resolver = ChainResolver::new(registry.clone());
//! let inputs = resolver.resolve_segmentation(segmentation).unwrap();
//! assert_eq!(inputs.output_path, PathBuf::from("/x/seg.bin"));
//! // Upload link falls back to what was recorded at creation
//! assert_eq!(inputs.upload_id.as_deref(), Some("scan-42"));
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod storage;
pub mod task;
pub mod testing;

pub use config::{ConfigError, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{ChainResolver, PipelineService, StageRunner, Submission};
pub use task::{StageKind, StageResult, TaskLinks, TaskRecord, TaskRegistry, TaskStatus, TaskUpdate};
