//! # Cache Admin Interface
//!
//! Operator endpoints for inspecting the cache and purging it by hand. Every
//! route requires an administrator principal.

use super::invalidation::{EntityEvent, InvalidationPipeline, MutationAction};
use super::matcher::infer_entity_name;
use super::repository::RuleRepository;
use super::rules::CacheRule;
use super::store::{CacheStore, StoreStats};
use crate::auth::require_admin;
use crate::core::error::{ServiceError, ServiceResult};
use axum::{
    extract::State,
    middleware::from_fn,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Cache admin state
#[derive(Clone)]
pub struct CacheAdminState {
    pub store: Arc<CacheStore>,
    pub repository: RuleRepository,
    pub pipeline: InvalidationPipeline,
}

/// Cache admin router
pub struct CacheAdminRouter;

impl CacheAdminRouter {
    /// Routes are relative; the binary nests them under `/admin`
    pub fn create_router(state: CacheAdminState) -> Router {
        Router::new()
            .route("/cache/stats", get(get_cache_stats))
            .route("/cache/rules", get(list_rules))
            .route("/cache/rules/refresh", post(refresh_rules))
            .route("/cache/invalidate", post(invalidate_pattern))
            .route("/cache/invalidate/entity", post(invalidate_entity))
            .layer(from_fn(require_admin))
            .with_state(state)
    }
}

/// Cache statistics response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub store: StoreStats,
    pub active_rules: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A rule with the entity type its pattern invalidates for
#[derive(Debug, Serialize, Deserialize)]
pub struct RuleView {
    #[serde(flatten)]
    pub rule: CacheRule,
    pub inferred_entity: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RuleListResponse {
    pub rules: Vec<RuleView>,
    pub count: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshResponse {
    pub active_rules: usize,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Pattern purge request
#[derive(Debug, Deserialize)]
pub struct PatternInvalidationRequest {
    pub pattern: String,
}

/// Entity purge request
#[derive(Debug, Deserialize)]
pub struct EntityInvalidationRequest {
    /// Content type uid (`api::course.course`) or bare type name
    pub uid: String,
}

/// Cache invalidation response
#[derive(Debug, Serialize, Deserialize)]
pub struct CacheInvalidationResponse {
    pub success: bool,
    pub message: String,
    pub invalidated_count: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Get cache statistics
pub async fn get_cache_stats(State(state): State<CacheAdminState>) -> Json<CacheStatsResponse> {
    let snapshot = state.repository.current_snapshot().await;

    Json(CacheStatsResponse {
        store: state.store.stats(),
        active_rules: snapshot.len(),
        timestamp: chrono::Utc::now(),
    })
}

/// List enabled rules with their current statistics
pub async fn list_rules(State(state): State<CacheAdminState>) -> ServiceResult<Json<RuleListResponse>> {
    let mut rules = state.repository.fetch_enabled().await?;
    rules.sort_by(|a, b| b.priority.cmp(&a.priority));

    let rules: Vec<RuleView> = rules
        .into_iter()
        .map(|rule| RuleView {
            inferred_entity: infer_entity_name(&rule.route_pattern),
            rule,
        })
        .collect();

    Ok(Json(RuleListResponse {
        count: rules.len(),
        rules,
        timestamp: chrono::Utc::now(),
    }))
}

/// Reload the rule snapshot now
pub async fn refresh_rules(State(state): State<CacheAdminState>) -> Json<RefreshResponse> {
    let snapshot = state.repository.refresh().await;
    info!("Cache rules refreshed via admin API: {} active", snapshot.len());

    Json(RefreshResponse {
        active_rules: snapshot.len(),
        timestamp: chrono::Utc::now(),
    })
}

/// Delete keys matching a glob pattern
pub async fn invalidate_pattern(
    State(state): State<CacheAdminState>,
    Json(request): Json<PatternInvalidationRequest>,
) -> ServiceResult<Json<CacheInvalidationResponse>> {
    let pattern = request.pattern.trim();
    if pattern.is_empty() {
        return Err(ServiceError::validation("pattern", "must not be empty"));
    }
    if !state.store.is_available() {
        return Err(ServiceError::store_unavailable("cache store is not connected"));
    }

    let deleted = state.store.delete_by_pattern(pattern).await;
    info!("Invalidated {} cache keys matching {} via admin API", deleted, pattern);

    Ok(Json(CacheInvalidationResponse {
        success: true,
        message: format!("Pattern '{}' invalidated", pattern),
        invalidated_count: deleted,
        timestamp: chrono::Utc::now(),
    }))
}

/// Run the invalidation pipeline for an entity type
pub async fn invalidate_entity(
    State(state): State<CacheAdminState>,
    Json(request): Json<EntityInvalidationRequest>,
) -> ServiceResult<Json<CacheInvalidationResponse>> {
    let event = EntityEvent::new(MutationAction::AfterUpdate, request.uid.trim());
    if event.uid.is_empty() {
        return Err(ServiceError::validation("uid", "must not be empty"));
    }
    if event.is_internal() {
        return Err(ServiceError::validation("uid", "internal content types are never cached"));
    }
    if !state.store.is_available() {
        return Err(ServiceError::store_unavailable("cache store is not connected"));
    }

    let deleted = state.pipeline.on_mutation(&event).await;

    Ok(Json(CacheInvalidationResponse {
        success: true,
        message: format!("Entity '{}' invalidated", event.entity_type()),
        invalidated_count: deleted,
        timestamp: chrono::Utc::now(),
    }))
}
