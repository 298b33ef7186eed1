//! Task registry behaviour under concurrent access
//!
//! Covers creation defaults, partial updates, unknown ids and interleaved
//! writers on different records.

use futures::future::join_all;
use neuropipe::task::{StageKind, TaskLinks, TaskRegistry, TaskStatus, TaskUpdate};
use proptest::prelude::*;
use uuid::Uuid;

#[test]
fn test_get_after_create_is_pending() {
    let registry = TaskRegistry::new();
    let id = registry.create(StageKind::Segmentation, TaskLinks::upload("u-1"));

    let record = registry.get(id).expect("record exists");
    assert_eq!(record.status, TaskStatus::Pending);
    assert_eq!(record.progress, 0.0);
    assert_eq!(record.message, "Task created");
    assert!(record.result.is_none());
    assert_eq!(record.links.upload_id.as_deref(), Some("u-1"));
}

#[test]
fn test_update_unknown_id_has_no_side_effect() {
    let registry = TaskRegistry::new();
    let existing = registry.create(StageKind::Segmentation, TaskLinks::default());
    let before = registry.get(existing).unwrap();

    let applied = registry.update(
        Uuid::new_v4(),
        TaskUpdate::new().status(TaskStatus::Failed).message("nope"),
    );

    assert!(!applied);
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(existing).unwrap(), before);
}

#[test]
fn test_repeated_get_is_identical() {
    let registry = TaskRegistry::new();
    let id = registry.create(StageKind::FeatureExtraction, TaskLinks::default());
    registry.update(id, TaskUpdate::new().progress(0.4).message("working"));

    let first = registry.get(id).unwrap();
    for _ in 0..10 {
        assert_eq!(registry.get(id).unwrap(), first);
    }
}

#[test]
fn test_partial_update_only_changes_given_fields() {
    let registry = TaskRegistry::new();
    let id = registry.create(StageKind::Segmentation, TaskLinks::default());
    registry.update(
        id,
        TaskUpdate::new()
            .status(TaskStatus::Processing)
            .progress(0.1)
            .message("Starting segmentation..."),
    );
    let before = registry.get(id).unwrap();

    registry.update(id, TaskUpdate::new().progress(0.5));
    let after = registry.get(id).unwrap();

    assert_eq!(after.status, TaskStatus::Processing);
    assert_eq!(after.message, "Starting segmentation...");
    assert_eq!(after.progress, 0.5);
    assert!(after.updated_at >= before.updated_at);
    assert_eq!(after.created_at, before.created_at);
}

#[test]
fn test_deleted_task_reads_as_not_found() {
    let registry = TaskRegistry::new();
    let id = registry.create(StageKind::Segmentation, TaskLinks::default());

    assert!(registry.delete(id));
    assert!(registry.get(id).is_none());
    assert!(!registry.delete(id));
    assert!(!registry.update(id, TaskUpdate::new().progress(0.2)));
}

#[test]
fn test_status_json_shape() {
    let registry = TaskRegistry::new();
    let id = registry.create(StageKind::Segmentation, TaskLinks::upload("u-9"));
    let value = serde_json::to_value(registry.get(id).unwrap()).unwrap();

    assert_eq!(value["task_id"], id.to_string());
    assert_eq!(value["task_type"], "segmentation");
    assert_eq!(value["status"], "pending");
    assert_eq!(value["upload_id"], "u-9");
    assert!(value["result"].is_null());
    assert!(value.get("created_at").is_some());
    assert!(value.get("updated_at").is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_updates_stay_on_their_own_record() {
    let registry = TaskRegistry::new();
    let first = registry.create(StageKind::Segmentation, TaskLinks::default());
    let second = registry.create(StageKind::Segmentation, TaskLinks::default());

    let writer = |id: Uuid, tag: &'static str| {
        let registry = registry.clone();
        tokio::spawn(async move {
            for step in 1..=50u32 {
                registry.update(
                    id,
                    TaskUpdate::new()
                        .status(TaskStatus::Processing)
                        .progress(f64::from(step) / 100.0)
                        .message(format!("{tag} step {step}")),
                );
                tokio::task::yield_now().await;
            }
            registry.update(
                id,
                TaskUpdate::new()
                    .status(TaskStatus::Completed)
                    .progress(1.0)
                    .message(format!("{tag} done")),
            );
        })
    };

    let results = join_all(vec![writer(first, "first"), writer(second, "second")]).await;
    for result in results {
        result.expect("writer task panicked");
    }

    let first = registry.get(first).unwrap();
    let second = registry.get(second).unwrap();
    assert_eq!(first.message, "first done");
    assert_eq!(second.message, "second done");
    assert_eq!(first.status, TaskStatus::Completed);
    assert_eq!(second.status, TaskStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_never_collide() {
    let registry = TaskRegistry::new();

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let registry = registry.clone();
            tokio::spawn(async move { registry.create(StageKind::Segmentation, TaskLinks::default()) })
        })
        .collect();

    let mut ids: Vec<Uuid> = join_all(handles)
        .await
        .into_iter()
        .map(|r| r.expect("create task panicked"))
        .collect();
    ids.sort();
    ids.dedup();

    assert_eq!(ids.len(), 100);
    assert_eq!(registry.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_partial_updates() {
    let registry = TaskRegistry::new();
    let id = registry.create(StageKind::Segmentation, TaskLinks::default());

    // Progress and message always change together
    let writer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for step in 0..200u32 {
                registry.update(
                    id,
                    TaskUpdate::new()
                        .progress(f64::from(step) / 200.0)
                        .message(format!("{step}")),
                );
                tokio::task::yield_now().await;
            }
        })
    };

    let reader = {
        let registry = registry.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let record = registry.get(id).unwrap();
                if record.message != "Task created" {
                    let step: u32 = record.message.parse().unwrap();
                    assert_eq!(record.progress, f64::from(step) / 200.0);
                }
                tokio::task::yield_now().await;
            }
        })
    };

    writer.await.unwrap();
    reader.await.unwrap();
}

fn any_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Pending),
        Just(TaskStatus::Processing),
        Just(TaskStatus::Completed),
        Just(TaskStatus::Failed),
    ]
}

proptest! {
    #[test]
    fn prop_progress_always_within_bounds(values in proptest::collection::vec(any::<f64>(), 1..20)) {
        let registry = TaskRegistry::new();
        let id = registry.create(StageKind::Segmentation, TaskLinks::default());

        for value in values {
            registry.update(id, TaskUpdate::new().progress(value));
            let progress = registry.get(id).unwrap().progress;
            prop_assert!((0.0..=1.0).contains(&progress));
        }
    }

    #[test]
    fn prop_update_applies_exactly_given_fields(
        status in proptest::option::of(any_status()),
        progress in proptest::option::of(0.0f64..=1.0),
        message in proptest::option::of("[a-z ]{1,20}"),
    ) {
        let registry = TaskRegistry::new();
        let id = registry.create(StageKind::Segmentation, TaskLinks::default());
        let before = registry.get(id).unwrap();

        let mut update = TaskUpdate::new();
        if let Some(status) = status {
            update = update.status(status);
        }
        if let Some(progress) = progress {
            update = update.progress(progress);
        }
        if let Some(message) = message.clone() {
            update = update.message(message);
        }
        prop_assert!(registry.update(id, update));

        let after = registry.get(id).unwrap();
        prop_assert_eq!(after.status, status.unwrap_or(before.status));
        prop_assert_eq!(after.progress, progress.unwrap_or(before.progress));
        prop_assert_eq!(after.message, message.unwrap_or(before.message));
        prop_assert!(after.result.is_none());
    }
}
