//! # HTTP Server Module
//!
//! Wires the cache core into an axum application: the content API behind the
//! cache middleware, the operator endpoints under `/admin` and an optional
//! Prometheus `/metrics` route.

use crate::auth::{bearer_token_principal, TokenAuthState};
use crate::caching::{
    cache_middleware, CacheAdminRouter, CacheAdminState, CacheLayerState, CacheStore, InMemoryRuleSource,
    InvalidationPipeline, LifecycleHooks, RuleRepository,
};
use crate::content::{content_router, ContentState};
use crate::core::config::AppConfig;
use crate::core::error::{ServiceError, ServiceResult};
use crate::observability::metrics_router;
use axum::{
    extract::State,
    middleware::from_fn_with_state,
    response::Json,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{json, Value};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// All long-lived components of the service
pub struct CacheServer {
    config: AppConfig,
    store: Arc<CacheStore>,
    rules: Arc<InMemoryRuleSource>,
    repository: RuleRepository,
    pipeline: InvalidationPipeline,
    content: ContentState,
}

impl CacheServer {
    /// Connect the configured store and load the rules
    pub async fn from_config(config: AppConfig) -> ServiceResult<Self> {
        let store = Arc::new(CacheStore::from_config(&config.redis).await);
        let server = Self::with_store(config, store)?;
        server.repository.init().await;
        Ok(server)
    }

    /// Assemble the components around an existing store
    pub fn with_store(config: AppConfig, store: Arc<CacheStore>) -> ServiceResult<Self> {
        let rules = Arc::new(InMemoryRuleSource::from_definitions(
            &config.rules,
            config.redis.default_ttl,
        )?);
        let repository = RuleRepository::new(rules.clone(), config.cache.rules_refresh_interval);
        let pipeline = InvalidationPipeline::new(store.clone(), repository.clone());

        let hooks = LifecycleHooks::new();
        hooks.subscribe(Arc::new(pipeline.clone()));
        info!("✅ Cache invalidation lifecycle hooks registered");

        Ok(Self {
            config,
            store,
            rules,
            repository,
            pipeline,
            content: ContentState::new(hooks),
        })
    }

    pub fn store(&self) -> &Arc<CacheStore> {
        &self.store
    }

    /// The rule source, for seeding or toggling rules at runtime
    pub fn rules(&self) -> &Arc<InMemoryRuleSource> {
        &self.rules
    }

    pub fn repository(&self) -> &RuleRepository {
        &self.repository
    }

    /// Build the application router
    pub fn router(&self, metrics: Option<PrometheusHandle>) -> Router {
        let cache_state = CacheLayerState::new(self.store.clone(), self.repository.clone(), &self.config.cache);

        let admin = CacheAdminRouter::create_router(CacheAdminState {
            store: self.store.clone(),
            repository: self.repository.clone(),
            pipeline: self.pipeline.clone(),
        })
        .layer(from_fn_with_state(
            TokenAuthState::new(self.config.server.admin_token.clone()),
            bearer_token_principal,
        ));

        let mut router = Router::new()
            .route("/health", get(health).with_state(self.store.clone()))
            .merge(content_router(self.content.clone()))
            .layer(from_fn_with_state(cache_state, cache_middleware))
            .nest("/admin", admin);

        if let Some(handle) = metrics {
            router = router.merge(metrics_router(handle));
        }

        router.layer(TraceLayer::new_for_http())
    }

    pub fn bind_addr(&self) -> ServiceResult<SocketAddr> {
        format!("{}:{}", self.config.server.bind_address, self.config.server.port)
            .parse()
            .map_err(|e| ServiceError::config(format!("Invalid bind address: {}", e)))
    }

    /// Serve until `shutdown` resolves, refreshing rules in the background
    pub async fn serve<F>(self, metrics: Option<PrometheusHandle>, shutdown: F) -> ServiceResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.bind_addr()?;
        let listener = TcpListener::bind(addr).await?;
        let refresher = self
            .repository
            .spawn_refresh_task(self.config.cache.rules_refresh_interval);

        info!("🌐 Cache service ready on {}", addr);
        let result = axum::serve(listener, self.router(metrics))
            .with_graceful_shutdown(shutdown)
            .await;

        refresher.abort();
        result.map_err(ServiceError::from)
    }
}

async fn health(State(store): State<Arc<CacheStore>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "cache_available": store.is_available(),
        "timestamp": chrono::Utc::now(),
    }))
}
