//! Tests for the operator-facing API surface.

use std::sync::Arc;

use acmf_scheduler::builders::SchedulerBuilder;
use acmf_scheduler::core::{
    FailureKind, MergeKnowledge, Outcome, StaticKnowledgeSource, Task, TaskResult, TaskStatus,
};
use acmf_scheduler::runtime::{
    health, submit, submit_in_background, utilization_snapshot, TaskSubmission, TokioSpawner,
};
use serde_json::json;

const CONFIG: &str = r#"{
    "pool": { "resources": [ { "id": "A", "capacity": 10 }, { "id": "B", "capacity": 5 } ] },
    "options": { "max_retries": 1, "backoff_base_ms": 1, "backoff_max_ms": 2, "jitter_fraction": 0.0 }
}"#;

fn knowledge() -> StaticKnowledgeSource {
    StaticKnowledgeSource::new().with_entry("ranker@v0", json!({ "lr": 0.001 }))
}

#[tokio::test]
async fn test_submit_from_json_request() {
    let scheduler = SchedulerBuilder::from_json_str(CONFIG)
        .unwrap()
        .build(knowledge(), MergeKnowledge)
        .unwrap();

    let req: TaskSubmission = serde_json::from_value(json!({
        "task_id": "req-1",
        "kind": "upgrade",
        "payload": { "model": { "name": "ranker", "version": 0, "state": {} } },
        "cost": 3
    }))
    .unwrap();

    let outcome = submit(&scheduler, req).await.unwrap();
    match outcome {
        Outcome::Success {
            result: TaskResult::Upgraded { resource_id, model },
        } => {
            assert_eq!(resource_id, "A");
            assert_eq!(model.version, 1);
            assert_eq!(model.state["lr"], json!(0.001));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(scheduler.status("req-1"), Some(TaskStatus::Completed));
}

#[tokio::test]
async fn test_submit_unknown_kind_is_invalid() {
    let scheduler = SchedulerBuilder::from_json_str(CONFIG)
        .unwrap()
        .build(knowledge(), MergeKnowledge)
        .unwrap();

    let req = TaskSubmission {
        task_id: None,
        kind: "monetize".into(),
        payload: json!(null),
        cost: 1,
    };
    let outcome = submit(&scheduler, req).await.unwrap();
    assert_eq!(outcome.failure_kind(), Some(FailureKind::InvalidTask));
    assert_eq!(scheduler.stats().failed, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_submit_in_background() {
    let scheduler = Arc::new(
        SchedulerBuilder::from_json_str(CONFIG)
            .unwrap()
            .build(knowledge(), MergeKnowledge)
            .unwrap(),
    );
    let spawner = TokioSpawner::current();

    let receivers: Vec<_> = (0..5)
        .map(|i| submit_in_background(&scheduler, &spawner, Task::allocate(format!("bg-{i}"), 2)))
        .collect();
    for rx in receivers {
        let outcome = rx.await.expect("outcome delivered").unwrap();
        assert!(outcome.is_success());
    }
    assert_eq!(scheduler.pool().total_load(), 0);
}

#[tokio::test]
async fn test_utilization_snapshot_and_health() {
    let scheduler = SchedulerBuilder::from_json_str(CONFIG)
        .unwrap()
        .build(knowledge(), MergeKnowledge)
        .unwrap();

    let snapshot = utilization_snapshot(&scheduler);
    let ids: Vec<&str> = snapshot.resources.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert!(snapshot.resources.iter().all(|r| r.load == 0));
    assert!(snapshot.captured_at_ms > 0);

    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["resources"][1]["capacity"], json!(5));
    assert!(health().ok);
}
