//! Chain resolver: upstream lookups, readiness and malformed results


use neuropipe::error::PipelineError;
use neuropipe::pipeline::{ChainResolver, ReportContext};
use neuropipe::task::{
    FeatureResult, FeatureTable, StageKind, StageResult, TaskLinks, TaskRegistry, TaskStatus,
    TaskUpdate,
};
use std::path::PathBuf;
use test_helpers::{complete_features, complete_segmentation, seeded_segmentation};
use uuid::Uuid;

#[test]
fn test_resolves_completed_segmentation() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let id = registry.create(StageKind::Segmentation, TaskLinks::upload("u1"));
    complete_segmentation(&registry, id, "/x/seg.bin", Some("u1"));

    let inputs = resolver.resolve_segmentation(id).expect("segmentation resolves");
    assert_eq!(inputs.task_id, id);
    assert_eq!(inputs.output_path, PathBuf::from("/x/seg.bin"));
    assert_eq!(inputs.upload_id.as_deref(), Some("u1"));
}

#[test]
fn test_upload_id_found_only_in_creation_links() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let id = registry.create(StageKind::Segmentation, TaskLinks::upload("only-in-links"));
    complete_segmentation(&registry, id, "/x/seg.bin", None);

    let inputs = resolver.resolve_segmentation(id).unwrap();
    assert_eq!(inputs.upload_id.as_deref(), Some("only-in-links"));
}

#[test]
fn test_unknown_upstream_is_not_found() {
    let resolver = ChainResolver::new(TaskRegistry::new());
    let missing = Uuid::new_v4();

    let err = resolver.resolve_segmentation(missing).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::UpstreamNotFound {
            stage: StageKind::Segmentation,
            task_id,
        } if task_id == missing
    ));
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_unfinished_upstream_is_not_ready() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let id = registry.create(StageKind::Segmentation, TaskLinks::upload("u1"));

    for status in [TaskStatus::Pending, TaskStatus::Processing, TaskStatus::Failed] {
        registry.update(id, TaskUpdate::new().status(status));
        let err = resolver.resolve_segmentation(id).unwrap_err();
        match err {
            PipelineError::UpstreamNotReady { status: seen, .. } => assert_eq!(seen, status),
            other => panic!("expected not-ready for {status}, got {other:?}"),
        }
    }
}

#[test]
fn test_completed_without_result_is_malformed() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let id = registry.create(StageKind::Segmentation, TaskLinks::upload("u1"));
    registry.update(id, TaskUpdate::new().status(TaskStatus::Completed));

    let err = resolver.resolve_segmentation(id).unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamResultMalformed { .. }));
    assert_eq!(err.to_string(), "No segmentation output found in task result");
}

#[test]
fn test_empty_feature_table_resolves() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let id = registry.create(StageKind::FeatureExtraction, TaskLinks::default());
    registry.update(
        id,
        TaskUpdate::new()
            .status(TaskStatus::Completed)
            .result(StageResult::Features(FeatureResult {
                features: FeatureTable::new(),
                output_path: PathBuf::from("/x/f.csv"),
                segmentation_task_id: None,
            })),
    );

    let inputs = resolver.resolve_features(id).expect("empty table is still a feature result");
    assert!(inputs.features.is_empty());
    assert_eq!(inputs.output_path, PathBuf::from("/x/f.csv"));
}

#[test]
fn test_completed_features_without_result_is_malformed() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let id = registry.create(StageKind::FeatureExtraction, TaskLinks::default());
    registry.update(id, TaskUpdate::new().status(TaskStatus::Completed));

    let err = resolver.resolve_features(id).unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamResultMalformed { .. }));
    assert_eq!(err.to_string(), "No features found in task result");
}

#[test]
fn test_report_context_follows_the_whole_chain() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let segmentation = seeded_segmentation(&registry, "u7");
    let features = registry.create(
        StageKind::FeatureExtraction,
        TaskLinks::segmentation(segmentation),
    );
    complete_features(&registry, features, None);

    let inputs = resolver.resolve_features(features).unwrap();
    assert_eq!(inputs.segmentation_task_id, Some(segmentation));

    let context = resolver.resolve_report_context(&inputs);
    assert_eq!(context.segmentation_path, Some(PathBuf::from("/x/seg.bin")));
    assert_eq!(context.upload_id.as_deref(), Some("u7"));
}

#[test]
fn test_report_context_is_empty_when_segmentation_was_deleted() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let segmentation = seeded_segmentation(&registry, "u7");
    let features = registry.create(
        StageKind::FeatureExtraction,
        TaskLinks::segmentation(segmentation),
    );
    complete_features(&registry, features, Some(segmentation));
    registry.delete(segmentation);

    let inputs = resolver.resolve_features(features).unwrap();
    assert_eq!(resolver.resolve_report_context(&inputs), ReportContext::default());
}

#[test]
fn test_resolution_does_not_mutate_upstream() {
    let registry = TaskRegistry::new();
    let resolver = ChainResolver::new(registry.clone());
    let segmentation = seeded_segmentation(&registry, "u1");
    let before = registry.get(segmentation).unwrap();

    for _ in 0..3 {
        resolver.resolve_segmentation(segmentation).unwrap();
    }

    assert_eq!(registry.get(segmentation).unwrap(), before);
}
