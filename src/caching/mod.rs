//! # Caching System Module
//!
//! Rule-driven response caching for the content API.
//!
//! ## Architecture
//! 1. **Store adapter** (`store`): fail-soft get / set / delete-by-pattern over a
//!    key-value backend (`stores`: Redis or in-process memory)
//! 2. **Rules** (`rules`): the `CacheRule` model and the `RuleSource` seam
//! 3. **Repository** (`repository`): atomically swapped snapshot of enabled rules
//! 4. **Matcher** (`matcher`): wildcard route patterns and entity-name inference
//! 5. **Middleware** (`middleware`): axum request interception
//! 6. **Invalidation** (`invalidation`): purges keys when entities change
//! 7. **Admin** (`admin`): operator endpoints
//!
//! ## Usage Example
//! ```rust,ignore
//! let store = Arc::new(CacheStore::from_config(&config.redis).await);
//! let source = Arc::new(InMemoryRuleSource::from_definitions(&config.rules, 3600)?);
//! let repository = RuleRepository::new(source, Duration::from_secs(60));
//!
//! let app = Router::new()
//!     .route("/api/courses", get(list_courses))
//!     .layer(from_fn_with_state(
//!         CacheLayerState::new(store.clone(), repository.clone(), &config.cache),
//!         cache_middleware,
//!     ));
//! ```

pub mod admin;
pub mod invalidation;
pub mod matcher;
pub mod middleware;
pub mod repository;
pub mod rules;
pub mod store;
pub mod stores;

pub use admin::{CacheAdminRouter, CacheAdminState};
pub use invalidation::{EntityEvent, InvalidationPipeline, LifecycleHooks, MutationAction, MutationSubscriber};
pub use matcher::{infer_entity_name, pattern_matches, CompiledPattern, CompiledRule, RuleMatcher};
pub use middleware::{cache_key, cache_middleware, CacheLayerState, CachedBody, CachedResponse};
pub use repository::{RuleRepository, RuleSnapshot};
pub use rules::{CacheRule, InMemoryRuleSource, RuleMethod, RuleOutcome, RuleSource, RuleStatistics};
pub use store::{CacheStore, StoreStats};
pub use stores::{InMemoryBackend, KeyValueBackend, RedisBackend};

use crate::core::error::ServiceError;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Rule source error: {message}")]
    RuleSource { message: String },

    #[error("Invalid rule: {message}")]
    InvalidRule { message: String },

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Cache not available")]
    Unavailable,
}

impl From<CacheError> for ServiceError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable => ServiceError::store_unavailable("cache store is not connected"),
            CacheError::Configuration { message } => ServiceError::config(message),
            other => ServiceError::internal(format!("Cache error: {}", other)),
        }
    }
}
