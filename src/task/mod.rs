//! Task records, typed stage results and the shared task registry

pub mod record;
pub mod registry;
pub mod result;

pub use record::{StageKind, TaskLinks, TaskRecord, TaskStatus, TaskUpdate};
pub use registry::TaskRegistry;
pub use result::{
    FeatureResult, FeatureTable, FeatureValue, ReportData, ReportResult, SegmentationResult,
    StageResult,
};
