//! Tests for configuration loading and validation.

use acmf_scheduler::builders::SchedulerBuilder;
use acmf_scheduler::config::{SchedulerConfig, SchedulerOptions};
use acmf_scheduler::core::{Classification, FailureKind, MergeKnowledge, SchedulerError, StaticKnowledgeSource};

#[test]
fn test_scheduler_config_roundtrip_defaults() {
    let cfg = SchedulerConfig::from_json_str(r#"{ "pool": { "resources": [ { "id": "gpu-0", "capacity": 24 } ] } }"#)
        .unwrap();
    assert_eq!(cfg.options, SchedulerOptions::default());
    assert_eq!(cfg.pool.resources[0].capacity, 24);
}

#[test]
fn test_invalid_options_rejected() {
    let json = r#"{
        "pool": { "resources": [ { "id": "a", "capacity": 1 } ] },
        "options": { "backoff_base_ms": 100, "backoff_max_ms": 10 }
    }"#;
    let err = SchedulerConfig::from_json_str(json).unwrap_err();
    assert!(err.starts_with("options invalid"));

    assert!(matches!(
        SchedulerBuilder::from_json_str(json),
        Err(SchedulerError::InvalidConfig(_))
    ));
}

#[test]
fn test_options_from_lookup() {
    let opts = SchedulerOptions::from_lookup(|name| match name {
        "ACMF_MAX_RETRIES" => Some("0".into()),
        "ACMF_JITTER_SEED" => Some("99".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(opts.max_retries, 0);
    assert_eq!(opts.jitter_seed, 99);

    let err = SchedulerOptions::from_lookup(|name| {
        (name == "ACMF_BACKOFF_BASE_MS").then(|| "999999".into())
    })
    .unwrap_err();
    assert!(err.contains("must not exceed"));
}

#[tokio::test]
async fn test_classification_override_via_builder() {
    let json = r#"{
        "pool": { "resources": [ { "id": "a", "capacity": 4 } ] },
        "options": { "max_retries": 2, "backoff_base_ms": 1, "backoff_max_ms": 1, "jitter_fraction": 0.0 }
    }"#;
    let scheduler = SchedulerBuilder::from_json_str(json)
        .unwrap()
        .with_classification(FailureKind::KnowledgeUnavailable, Classification::Permanent)
        .build(StaticKnowledgeSource::new(), MergeKnowledge)
        .unwrap();

    let outcome = scheduler
        .submit_task(
            "upgrade",
            serde_json::json!({ "model": { "name": "m", "version": 0 } }),
            1,
        )
        .await
        .unwrap();
    assert_eq!(outcome.failure_kind(), Some(FailureKind::KnowledgeUnavailable));
    assert_eq!(scheduler.stats().retries, 0);
}
