//! # Cache Invalidation Module
//!
//! Purges cached responses when content entities change.
//!
//! The content layer emits an [`EntityEvent`] through [`LifecycleHooks`] after
//! every committed create, update or delete. The [`InvalidationPipeline`]
//! infers an entity type from each enabled rule's route pattern and, for rules
//! naming the mutated type, deletes every key matching `*{route_pattern}*`.

use super::matcher::infer_entity_name;
use super::repository::RuleRepository;
use super::store::CacheStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Namespaces reserved for system types; never invalidated
pub const INTERNAL_NAMESPACES: &[&str] = &["admin::", "plugin::"];

/// Kind of mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationAction {
    AfterCreate,
    AfterUpdate,
    AfterDelete,
}

/// A committed change to one entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityEvent {
    pub action: MutationAction,

    /// Content type uid, e.g. `api::course.course`
    pub uid: String,

    /// The entity as written, when available
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EntityEvent {
    pub fn new<S: Into<String>>(action: MutationAction, uid: S) -> Self {
        Self {
            action,
            uid: uid.into(),
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Entity type name: the part of the uid after the last `.`
    pub fn entity_type(&self) -> &str {
        self.uid.rsplit_once('.').map_or(self.uid.as_str(), |(_, name)| name)
    }

    /// Whether the uid belongs to a reserved namespace
    pub fn is_internal(&self) -> bool {
        INTERNAL_NAMESPACES.iter().any(|ns| self.uid.starts_with(ns))
    }
}

/// Receives entity events after the write has been committed
///
/// Subscribers handle their own failures; nothing propagates back to the write.
#[async_trait]
pub trait MutationSubscriber: Send + Sync {
    async fn on_event(&self, event: &EntityEvent);
}

/// Registry of mutation subscribers
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    subscribers: Arc<RwLock<Vec<Arc<dyn MutationSubscriber>>>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn MutationSubscriber>) {
        self.subscribers.write().push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Deliver an event to every subscriber in registration order
    pub async fn emit(&self, event: &EntityEvent) {
        if event.is_internal() {
            return;
        }

        let subscribers = self.subscribers.read().clone();
        for subscriber in subscribers {
            subscriber.on_event(event).await;
        }
    }
}

/// Maps entity mutations to cache purges
#[derive(Clone)]
pub struct InvalidationPipeline {
    store: Arc<CacheStore>,
    repository: RuleRepository,
}

impl InvalidationPipeline {
    pub fn new(store: Arc<CacheStore>, repository: RuleRepository) -> Self {
        Self { store, repository }
    }

    /// Key pattern purged for a rule, built from the trimmed route pattern
    /// the matcher compiles
    pub fn purge_pattern(route_pattern: &str) -> String {
        format!("*{}*", route_pattern.trim())
    }

    /// Handle one mutation and return the number of keys deleted
    pub async fn on_mutation(&self, event: &EntityEvent) -> u64 {
        if event.is_internal() {
            return 0;
        }

        debug!("Entity {:?} on {}", event.action, event.uid);
        self.invalidate_entity(event.entity_type()).await
    }

    /// Purge every rule whose route pattern names `entity_type`
    pub async fn invalidate_entity(&self, entity_type: &str) -> u64 {
        if !self.store.is_available() {
            return 0;
        }

        // Fresh fetch so rules edited since the last snapshot are honoured
        let rules = match self.repository.fetch_enabled().await {
            Ok(rules) => rules,
            Err(e) => {
                debug!("Cache invalidation error: {}", e);
                return 0;
            }
        };

        let mut total = 0;
        for rule in rules.iter().filter(|rule| rule.enabled) {
            let Some(detected) = infer_entity_name(&rule.route_pattern) else {
                debug!(
                    "Rule \"{}\": cannot detect entity from route \"{}\", skipping",
                    rule.name, rule.route_pattern
                );
                continue;
            };

            if detected != entity_type {
                continue;
            }

            let deleted = self
                .store
                .delete_by_pattern(&Self::purge_pattern(&rule.route_pattern))
                .await;

            if deleted > 0 {
                info!(
                    "🗑️  Invalidated {} cache keys for rule: {} (entity: {})",
                    deleted, rule.name, entity_type
                );
                metrics::counter!("api_cache_invalidated_keys_total", "rule" => rule.name.clone())
                    .increment(deleted);
            }
            total += deleted;
        }

        total
    }
}

#[async_trait]
impl MutationSubscriber for InvalidationPipeline {
    async fn on_event(&self, event: &EntityEvent) {
        self.on_mutation(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::rules::{CacheRule, InMemoryRuleSource, RuleMethod};
    use crate::caching::stores::InMemoryBackend;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn setup(rules: Vec<CacheRule>) -> (InvalidationPipeline, Arc<CacheStore>, Arc<InMemoryBackend>) {
        let source = Arc::new(InMemoryRuleSource::new());
        for rule in rules {
            source.insert(rule);
        }
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(CacheStore::new(backend.clone()));
        let repository = RuleRepository::new(source, Duration::from_secs(60));
        (InvalidationPipeline::new(store.clone(), repository), store, backend)
    }

    #[test]
    fn test_entity_event_parsing() {
        let event = EntityEvent::new(MutationAction::AfterUpdate, "api::course.course");
        assert_eq!(event.entity_type(), "course");
        assert!(!event.is_internal());

        assert!(EntityEvent::new(MutationAction::AfterCreate, "admin::user").is_internal());
        assert!(EntityEvent::new(MutationAction::AfterCreate, "plugin::upload.file").is_internal());
        assert_eq!(EntityEvent::new(MutationAction::AfterDelete, "category").entity_type(), "category");
    }

    #[test]
    fn test_action_serialization() {
        assert_eq!(serde_json::to_string(&MutationAction::AfterCreate).unwrap(), "\"afterCreate\"");
    }

    #[tokio::test]
    async fn test_invalidation_targets_matching_entity() {
        let (pipeline, store, backend) = setup(vec![CacheRule::new(
            "category report",
            "/api/categories/report",
            RuleMethod::Get,
            60,
        )])
        .await;
        store.set("api:/api/categories/report", &json!({"data": 1}), 60).await;
        store.set("api:/api/categories/report?year=2024", &json!({"data": 2}), 60).await;
        store.set("api:/api/courses", &json!({"data": 3}), 60).await;

        let course = EntityEvent::new(MutationAction::AfterUpdate, "api::course.course");
        assert_eq!(pipeline.on_mutation(&course).await, 0);
        assert_eq!(backend.len(), 3);

        let category = EntityEvent::new(MutationAction::AfterUpdate, "api::category.category");
        assert_eq!(pipeline.on_mutation(&category).await, 2);
        assert_eq!(backend.len(), 1);
        assert!(backend.contains_key("api:/api/courses"));
    }

    #[test]
    fn test_purge_pattern_ignores_surrounding_whitespace() {
        assert_eq!(InvalidationPipeline::purge_pattern(" /api/courses \n"), "*/api/courses*");
        assert_eq!(InvalidationPipeline::purge_pattern("/api/courses/*"), "*/api/courses/**");
    }

    #[tokio::test]
    async fn test_padded_rule_pattern_still_invalidates() {
        let (pipeline, store, backend) = setup(vec![CacheRule::new("courses", " /api/courses ", RuleMethod::Get, 60)]).await;
        store.set("api:/api/courses", &json!(1), 60).await;
        store.set("api:/api/courses?page=2", &json!(2), 60).await;

        assert_eq!(pipeline.invalidate_entity("course").await, 2);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_rules_without_inferable_entity_are_skipped() {
        let (pipeline, store, backend) = setup(vec![
            CacheRule::new("custom", "custom/path", RuleMethod::Get, 60),
            CacheRule::new("broad", "/api/*", RuleMethod::All, 60),
        ])
        .await;
        store.set("api:custom/path", &json!(1), 60).await;

        assert_eq!(pipeline.invalidate_entity("custom").await, 0);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_rules_do_not_invalidate() {
        let (pipeline, store, _) = setup(vec![CacheRule::new("courses", "/api/courses", RuleMethod::Get, 60).disabled()]).await;
        store.set("api:/api/courses", &json!(1), 60).await;

        assert_eq!(pipeline.invalidate_entity("course").await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_is_noop() {
        let (pipeline, store, backend) = setup(vec![CacheRule::new("courses", "/api/courses", RuleMethod::Get, 60)]).await;
        store.set("api:/api/courses", &json!(1), 60).await;
        backend.set_ready(false);

        assert_eq!(pipeline.invalidate_entity("course").await, 0);
        backend.set_ready(true);
        assert!(backend.contains_key("api:/api/courses"));
    }

    struct CountingSubscriber(AtomicUsize);

    #[async_trait]
    impl MutationSubscriber for CountingSubscriber {
        async fn on_event(&self, _event: &EntityEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_hooks_skip_internal_namespaces() {
        let hooks = LifecycleHooks::new();
        let counter = Arc::new(CountingSubscriber(AtomicUsize::new(0)));
        hooks.subscribe(counter.clone());
        assert_eq!(hooks.subscriber_count(), 1);

        hooks.emit(&EntityEvent::new(MutationAction::AfterCreate, "api::course.course")).await;
        hooks.emit(&EntityEvent::new(MutationAction::AfterCreate, "admin::role")).await;
        hooks.emit(&EntityEvent::new(MutationAction::AfterCreate, "plugin::i18n.locale")).await;

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hooks_drive_pipeline() {
        let (pipeline, store, backend) = setup(vec![CacheRule::new("courses", "/api/courses*", RuleMethod::Get, 60)]).await;
        store.set("api:/api/courses?page=1", &json!(1), 60).await;

        let hooks = LifecycleHooks::new();
        hooks.subscribe(Arc::new(pipeline));
        hooks
            .emit(&EntityEvent::new(MutationAction::AfterDelete, "api::course.course").with_payload(json!({"id": 1})))
            .await;

        assert!(backend.is_empty());
    }
}
