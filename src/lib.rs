//! # API Cache Library
//!
//! Rule-driven response caching for a content API, backed by Redis, with
//! automatic invalidation when content entities change.
//!
//! ## Modules
//! - `core`: configuration and the service error type
//! - `caching`: store adapter, rule repository, matcher, middleware,
//!   invalidation pipeline and operator endpoints
//! - `auth`: request principals and the admin guard
//! - `content`: in-memory content API the cache fronts
//! - `observability`: logging and Prometheus metrics
//! - `server`: application wiring

/// Configuration loading and the service error type
pub mod core;

/// Rule-driven response cache
pub mod caching;

/// Principals and admin authorization
pub mod auth;

/// In-memory content API emitting mutation events
pub mod content;

/// Structured logging and metrics
pub mod observability;

/// Application router and server lifecycle
pub mod server;

pub use crate::core::config::AppConfig;
pub use crate::core::error::{ServiceError, ServiceResult};
pub use caching::{CacheRule, CacheStore, InvalidationPipeline, RuleRepository};
pub use server::CacheServer;
