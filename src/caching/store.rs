//! # Cache Store Adapter
//!
//! Fail-soft facade over a [`KeyValueBackend`]. Values are JSON encoded. No
//! operation returns an error to its caller: an unavailable store reads as a
//! miss, writes report `false` and purges report zero deletions.

use super::stores::{InMemoryBackend, KeyValueBackend, RedisBackend};
use crate::core::config::{RedisConfig, StoreBackend};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Store adapter statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    /// Configured on
    pub enabled: bool,

    /// Enabled and connected
    pub available: bool,

    /// Backend name, if one was built
    pub backend: Option<String>,

    /// Reads that returned a value
    pub hits: u64,

    /// Reads that found nothing
    pub misses: u64,

    /// Successful writes
    pub sets: u64,

    /// Keys removed by pattern deletes
    pub deleted_keys: u64,

    /// Backend failures swallowed by the adapter
    pub errors: u64,

    /// hits / (hits + misses)
    pub hit_ratio: f64,

    /// When the adapter was created
    pub start_time: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default)]
struct StoreCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deleted_keys: AtomicU64,
    errors: AtomicU64,
}

/// Key-value store adapter used by the middleware and invalidation pipeline
pub struct CacheStore {
    enabled: bool,
    backend: Option<Arc<dyn KeyValueBackend>>,
    counters: StoreCounters,
    start_time: chrono::DateTime<chrono::Utc>,
}

impl CacheStore {
    /// Wrap an already connected backend
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        Self {
            enabled: true,
            backend: Some(backend),
            counters: StoreCounters::default(),
            start_time: chrono::Utc::now(),
        }
    }

    /// A store that is switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            backend: None,
            counters: StoreCounters::default(),
            start_time: chrono::Utc::now(),
        }
    }

    /// A store that is switched on but could not connect
    pub fn degraded() -> Self {
        Self {
            enabled: true,
            ..Self::disabled()
        }
    }

    /// Build the store described by the configuration
    ///
    /// Connection failures are logged and produce a degraded store; start-up
    /// continues without caching.
    pub async fn from_config(config: &RedisConfig) -> Self {
        if !config.enabled {
            info!("Cache store disabled by configuration");
            return Self::disabled();
        }

        match config.backend {
            StoreBackend::Memory => {
                info!("Using in-memory cache store");
                Self::new(Arc::new(InMemoryBackend::new()))
            }
            StoreBackend::Redis => match RedisBackend::connect(config).await {
                Ok(backend) => Self::new(Arc::new(backend)),
                Err(e) => {
                    error!("Redis cache unavailable, serving without cache: {}", e);
                    Self::degraded()
                }
            },
        }
    }

    /// Whether the store is enabled and its connection is ready
    pub fn is_available(&self) -> bool {
        self.enabled && self.backend.as_ref().map_or(false, |backend| backend.is_ready())
    }

    fn ready_backend(&self) -> Option<&Arc<dyn KeyValueBackend>> {
        if self.enabled {
            self.backend.as_ref().filter(|backend| backend.is_ready())
        } else {
            None
        }
    }

    /// Read and decode a value; any failure reads as absent
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let backend = self.ready_backend()?;

        match backend.get(key).await {
            Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                }
                Err(e) => {
                    self.counters.errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Discarding undecodable cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!("Cache get failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Encode and write a value; a zero TTL stores without expiry
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl_seconds: u64) -> bool {
        let Some(backend) = self.ready_backend() else {
            return false;
        };

        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to encode cache entry {}: {}", key, e);
                return false;
            }
        };

        let ttl = (ttl_seconds > 0).then(|| Duration::from_secs(ttl_seconds));
        match backend.set(key, &bytes, ttl).await {
            Ok(()) => {
                self.counters.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                debug!("Cache set failed for {}: {}", key, e);
                false
            }
        }
    }

    /// Delete every key matching a glob pattern
    pub async fn delete_by_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = self.ready_backend() else {
            return 0;
        };

        match backend.delete_matching(pattern).await {
            Ok(deleted) => {
                self.counters.deleted_keys.fetch_add(deleted, Ordering::Relaxed);
                deleted
            }
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Cache pattern delete failed for {}: {}", pattern, e);
                0
            }
        }
    }

    /// Snapshot of the adapter counters
    pub fn stats(&self) -> StoreStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        StoreStats {
            enabled: self.enabled,
            available: self.is_available(),
            backend: self.backend.as_ref().map(|backend| backend.name().to_string()),
            hits,
            misses,
            sets: self.counters.sets.load(Ordering::Relaxed),
            deleted_keys: self.counters.deleted_keys.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            hit_ratio: if lookups > 0 { hits as f64 / lookups as f64 } else { 0.0 },
            start_time: self.start_time,
        }
    }
}
