//! Model upgrades driven by an external knowledge source.
//!
//! The engine asks its [`FeedbackStrategy`] which knowledge keys a model
//! needs, fetches each from the [`KnowledgeSource`], and lets the strategy
//! produce the upgraded model. Cancellation is checked before every fetch.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::core::SchedulerError;

/// A model artifact as seen by the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Model name.
    pub name: String,
    /// Monotonic version, bumped by each successful upgrade.
    pub version: u32,
    /// Opaque model state.
    #[serde(default)]
    pub state: serde_json::Value,
}

impl Model {
    /// Create a model at version 0 with an empty object state.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            state: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    /// Knowledge key derived from the model's current state.
    pub fn knowledge_key(&self) -> String {
        format!("{}@v{}", self.name, self.version)
    }
}

/// Payload of an `upgrade` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeRequest {
    /// Model to upgrade.
    pub model: Model,
    /// Explicit knowledge query; derived from the model when absent.
    #[serde(default)]
    pub knowledge_query: Option<String>,
}

/// Answer from a knowledge source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeResult {
    /// Key that was queried.
    pub key: String,
    /// Facts returned for the key.
    pub facts: serde_json::Value,
}

/// External knowledge source.
///
/// Any error is treated as recoverable; implementations should return
/// `SchedulerError::KnowledgeUnavailable` when they cannot answer.
#[async_trait]
pub trait KnowledgeSource: Send + Sync + 'static {
    /// Look up knowledge for `key`.
    async fn query(&self, key: &str) -> Result<KnowledgeResult, SchedulerError>;
}

/// Map-backed knowledge source.
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeSource {
    entries: HashMap<String, serde_json::Value>,
}

impl StaticKnowledgeSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry.
    #[must_use]
    pub fn with_entry(mut self, key: impl Into<String>, facts: serde_json::Value) -> Self {
        self.entries.insert(key.into(), facts);
        self
    }
}

#[async_trait]
impl KnowledgeSource for StaticKnowledgeSource {
    async fn query(&self, key: &str) -> Result<KnowledgeResult, SchedulerError> {
        self.entries
            .get(key)
            .map(|facts| KnowledgeResult {
                key: key.to_string(),
                facts: facts.clone(),
            })
            .ok_or_else(|| SchedulerError::KnowledgeUnavailable(format!("no entry for `{key}`")))
    }
}

/// Pluggable upgrade algorithm.
pub trait FeedbackStrategy: Send + Sync + 'static {
    /// Knowledge keys needed to upgrade `model`. Defaults to the explicit
    /// query when given, otherwise the model's own knowledge key.
    fn queries(&self, model: &Model, hint: Option<&str>) -> Vec<String> {
        vec![hint.map_or_else(|| model.knowledge_key(), str::to_string)]
    }

    /// Produce the upgraded model, or `SchedulerError::Transform` if the
    /// model cannot be upgraded.
    fn apply(&self, model: Model, knowledge: &[KnowledgeResult]) -> Result<Model, SchedulerError>;
}

/// Merges each knowledge object into the model state and bumps the version.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeKnowledge;

impl FeedbackStrategy for MergeKnowledge {
    fn apply(&self, mut model: Model, knowledge: &[KnowledgeResult]) -> Result<Model, SchedulerError> {
        let state = model.state.as_object_mut().ok_or_else(|| {
            SchedulerError::Transform(format!("model `{}` state is not an object", model.name))
        })?;
        for result in knowledge {
            let facts = result.facts.as_object().ok_or_else(|| {
                SchedulerError::Transform(format!("knowledge `{}` is not an object", result.key))
            })?;
            for (k, v) in facts {
                state.insert(k.clone(), v.clone());
            }
        }
        model.version = model.version.saturating_add(1);
        Ok(model)
    }
}

/// Applies a feedback strategy to models using a knowledge source.
pub struct UpgradeEngine<K, F> {
    knowledge: K,
    strategy: F,
}

impl<K, F> UpgradeEngine<K, F>
where
    K: KnowledgeSource,
    F: FeedbackStrategy,
{
    /// Create an engine.
    pub const fn new(knowledge: K, strategy: F) -> Self {
        Self { knowledge, strategy }
    }

    /// Strategy in use.
    pub const fn strategy(&self) -> &F {
        &self.strategy
    }

    /// Upgrade `model`.
    pub async fn upgrade(
        &self,
        model: Model,
        knowledge_query: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<Model, SchedulerError> {
        tracing::info!(model = %model.name, version = model.version, "attempting upgrade");
        let keys = self.strategy.queries(&model, knowledge_query);
        let mut knowledge = Vec::with_capacity(keys.len());
        for key in &keys {
            if cancel.is_cancelled() {
                tracing::info!(model = %model.name, "upgrade cancelled");
                return Err(SchedulerError::Cancelled);
            }
            knowledge.push(self.knowledge.query(key).await?);
        }
        let upgraded = self.strategy.apply(model, &knowledge).map_err(|e| {
            tracing::warn!(error = %e, "feedback strategy rejected model");
            e
        })?;
        tracing::info!(model = %upgraded.name, version = upgraded.version, "upgrade applied");
        Ok(upgraded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engine() -> UpgradeEngine<StaticKnowledgeSource, MergeKnowledge> {
        let kb = StaticKnowledgeSource::new()
            .with_entry("ranker@v0", json!({ "lr": 0.01 }))
            .with_entry("tuning", json!({ "epochs": 3 }));
        UpgradeEngine::new(kb, MergeKnowledge)
    }

    #[tokio::test]
    async fn test_upgrade_with_derived_query() {
        let model = Model::new("ranker");
        let upgraded = engine()
            .upgrade(model, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(upgraded.version, 1);
        assert_eq!(upgraded.state["lr"], json!(0.01));
    }

    #[tokio::test]
    async fn test_upgrade_with_explicit_query() {
        let model = Model::new("ranker");
        let upgraded = engine()
            .upgrade(model, Some("tuning"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(upgraded.state["epochs"], json!(3));
    }

    #[tokio::test]
    async fn test_upgrade_knowledge_unavailable() {
        let model = Model::new("unknown-model");
        let err = engine()
            .upgrade(model, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::KnowledgeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_upgrade_transform_error() {
        let mut model = Model::new("ranker");
        model.state = json!([1, 2, 3]);
        let err = engine()
            .upgrade(model, None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Transform(_)));
    }

    #[tokio::test]
    async fn test_upgrade_cancelled_before_fetch() {
        let token = CancellationToken::new();
        token.cancel();
        let err = engine()
            .upgrade(Model::new("ranker"), None, &token)
            .await
            .unwrap_err();
        assert_eq!(err, SchedulerError::Cancelled);
    }

    #[test]
    fn test_merge_rejects_non_object_knowledge() {
        let knowledge = vec![KnowledgeResult {
            key: "k".into(),
            facts: json!("text"),
        }];
        let err = MergeKnowledge.apply(Model::new("m"), &knowledge).unwrap_err();
        assert!(matches!(err, SchedulerError::Transform(_)));
    }
}
