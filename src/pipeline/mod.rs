//! Stage execution, upstream resolution and submission

pub mod resolver;
pub mod runner;
pub mod service;

pub use resolver::{
    segmentation_link, upload_link, ChainResolver, FeatureInputs, ReportContext,
    SegmentationInputs,
};
pub use runner::{ProgressReporter, StageRunner, INITIAL_PROGRESS};
pub use service::{OutputPaths, PipelineService, Submission};
