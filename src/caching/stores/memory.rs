//! # In-Memory Cache Store
//!
//! Process-local backend with per-entry expiry. Expired entries are dropped
//! lazily on access and during pattern deletes.

use super::{glob_matches, KeyValueBackend};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

/// In-memory key-value backend
pub struct InMemoryBackend {
    entries: DashMap<String, MemoryEntry>,
    ready: AtomicBool,
}

impl InMemoryBackend {
    /// Create an empty, ready backend
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            ready: AtomicBool::new(true),
        }
    }

    /// Flip readiness, e.g. to simulate an outage
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Relaxed);
    }

    /// Number of live (non-expired) entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live entry exists for `key`
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map_or(false, |entry| !entry.is_expired(Instant::now()))
    }

    /// Remaining lifetime of an entry; `Some(None)` means stored without expiry
    pub fn ttl(&self, key: &str) -> Option<Option<Duration>> {
        let now = Instant::now();
        self.entries.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.expires_at.map(|at| at.saturating_duration_since(now)))
            }
        })
    }

    fn ensure_ready(&self) -> CacheResult<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(CacheError::Unavailable)
        }
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.ensure_ready()?;

        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.ensure_ready()?;

        let entry = MemoryEntry {
            value: value.to_vec(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> CacheResult<u64> {
        self.ensure_ready()?;

        let now = Instant::now();
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| glob_matches(pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect();

        let mut deleted = 0;
        for key in keys {
            if let Some((_, entry)) = self.entries.remove(&key) {
                // Expired entries are dropped but not counted, as Redis would not see them
                if !entry.is_expired(now) {
                    deleted += 1;
                }
            }
        }

        debug!("Deleted {} in-memory keys matching {}", deleted, pattern);
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = InMemoryBackend::new();

        backend.set("api:/api/courses", b"[1,2]", Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(backend.get("api:/api/courses").await.unwrap(), Some(b"[1,2]".to_vec()));
        assert_eq!(backend.get("api:/api/missing").await.unwrap(), None);
        assert!(backend.contains_key("api:/api/courses"));
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let backend = InMemoryBackend::new();

        backend.set("short", b"v", Some(Duration::from_millis(50))).await.unwrap();
        assert!(backend.contains_key("short"));

        sleep(Duration::from_millis(80)).await;
        assert_eq!(backend.get("short").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_no_expiry_without_ttl() {
        let backend = InMemoryBackend::new();

        backend.set("forever", b"v", None).await.unwrap();
        assert_eq!(backend.ttl("forever"), Some(None));
        assert_eq!(backend.ttl("absent"), None);
    }

    #[tokio::test]
    async fn test_delete_matching() {
        let backend = InMemoryBackend::new();
        let ttl = Some(Duration::from_secs(60));

        backend.set("api:/api/categories/report", b"a", ttl).await.unwrap();
        backend.set("api:/api/categories/report?year=2024", b"b", ttl).await.unwrap();
        backend.set("api:/api/courses", b"c", ttl).await.unwrap();

        let deleted = backend.delete_matching("*/api/categories/report*").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(backend.len(), 1);
        assert!(backend.contains_key("api:/api/courses"));
    }

    #[tokio::test]
    async fn test_not_ready_reports_unavailable() {
        let backend = InMemoryBackend::new();
        backend.set_ready(false);

        assert!(matches!(backend.get("k").await, Err(CacheError::Unavailable)));
        assert!(matches!(backend.set("k", b"v", None).await, Err(CacheError::Unavailable)));
        assert!(matches!(backend.delete_matching("*").await, Err(CacheError::Unavailable)));
    }
}
