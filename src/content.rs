//! # Content API
//!
//! A small in-memory collection API under `/api/:collection`. It stands in for
//! the content server the cache fronts: reads go through the cache middleware
//! and every committed write emits an [`EntityEvent`] through the lifecycle
//! hooks before the response is sent.

use crate::caching::invalidation::{EntityEvent, LifecycleHooks, MutationAction};
use crate::caching::matcher::singularize;
use crate::core::error::{ServiceError, ServiceResult};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::get,
    Router,
};
use dashmap::DashMap;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Content type uid for a collection: `courses` gives `api::course.course`
pub fn content_type_uid(collection: &str) -> String {
    let singular = singularize(collection);
    format!("api::{}.{}", singular, singular)
}

/// Entries grouped by collection, ids unique across collections
#[derive(Default)]
pub struct ContentRepository {
    collections: DashMap<String, BTreeMap<u64, Value>>,
    next_id: AtomicU64,
}

impl ContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self, collection: &str) -> Vec<Value> {
        self.collections
            .get(collection)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn get(&self, collection: &str, id: u64) -> Option<Value> {
        self.collections.get(collection)?.get(&id).cloned()
    }

    pub fn create(&self, collection: &str, mut attributes: Map<String, Value>) -> Value {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        attributes.insert("id".to_string(), json!(id));
        let entry = Value::Object(attributes);

        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id, entry.clone());
        entry
    }

    /// Merge attributes into an existing entry; the id cannot change
    pub fn update(&self, collection: &str, id: u64, attributes: Map<String, Value>) -> Option<Value> {
        let mut entries = self.collections.get_mut(collection)?;
        let entry = entries.get_mut(&id)?;

        if let Value::Object(fields) = entry {
            for (key, value) in attributes {
                if key != "id" {
                    fields.insert(key, value);
                }
            }
        }
        Some(entry.clone())
    }

    pub fn delete(&self, collection: &str, id: u64) -> Option<Value> {
        self.collections.get_mut(collection)?.remove(&id)
    }
}

/// Content API state
#[derive(Clone)]
pub struct ContentState {
    pub repository: Arc<ContentRepository>,
    pub hooks: LifecycleHooks,
}

impl ContentState {
    pub fn new(hooks: LifecycleHooks) -> Self {
        Self {
            repository: Arc::new(ContentRepository::new()),
            hooks,
        }
    }

    async fn emit(&self, action: MutationAction, collection: &str, entry: &Value) {
        let event = EntityEvent::new(action, content_type_uid(collection)).with_payload(entry.clone());
        debug!("Emitting {:?} for {}", action, event.uid);
        self.hooks.emit(&event).await;
    }
}

pub fn content_router(state: ContentState) -> Router {
    Router::new()
        .route("/api/:collection", get(list_entries).post(create_entry))
        .route(
            "/api/:collection/:id",
            get(get_entry).put(update_entry).delete(delete_entry),
        )
        .with_state(state)
}

fn object_body(body: Value) -> ServiceResult<Map<String, Value>> {
    match body {
        Value::Object(mut fields) => {
            // Accept both `{"data": {...}}` and a bare object
            match fields.remove("data") {
                Some(Value::Object(inner)) => Ok(inner),
                Some(_) => Err(ServiceError::validation("data", "must be an object")),
                None => Ok(fields),
            }
        }
        _ => Err(ServiceError::validation("body", "must be a JSON object")),
    }
}

async fn list_entries(State(state): State<ContentState>, Path(collection): Path<String>) -> Json<Value> {
    let entries = state.repository.list(&collection);
    let total = entries.len();
    Json(json!({ "data": entries, "meta": { "total": total } }))
}

async fn get_entry(
    State(state): State<ContentState>,
    Path((collection, id)): Path<(String, u64)>,
) -> ServiceResult<Json<Value>> {
    state
        .repository
        .get(&collection, id)
        .map(|entry| Json(json!({ "data": entry })))
        .ok_or_else(|| ServiceError::not_found(format!("{} {}", collection, id)))
}

async fn create_entry(
    State(state): State<ContentState>,
    Path(collection): Path<String>,
    Json(body): Json<Value>,
) -> ServiceResult<Json<Value>> {
    let entry = state.repository.create(&collection, object_body(body)?);
    state.emit(MutationAction::AfterCreate, &collection, &entry).await;
    Ok(Json(json!({ "data": entry })))
}

async fn update_entry(
    State(state): State<ContentState>,
    Path((collection, id)): Path<(String, u64)>,
    Json(body): Json<Value>,
) -> ServiceResult<Json<Value>> {
    let entry = state
        .repository
        .update(&collection, id, object_body(body)?)
        .ok_or_else(|| ServiceError::not_found(format!("{} {}", collection, id)))?;
    state.emit(MutationAction::AfterUpdate, &collection, &entry).await;
    Ok(Json(json!({ "data": entry })))
}

async fn delete_entry(
    State(state): State<ContentState>,
    Path((collection, id)): Path<(String, u64)>,
) -> ServiceResult<Json<Value>> {
    let entry = state
        .repository
        .delete(&collection, id)
        .ok_or_else(|| ServiceError::not_found(format!("{} {}", collection, id)))?;
    state.emit(MutationAction::AfterDelete, &collection, &entry).await;
    Ok(Json(json!({ "data": entry })))
}
