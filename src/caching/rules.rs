//! # Cache Rules
//!
//! The `CacheRule` model, per-rule statistics and the `RuleSource` seam the
//! repository reads rules from. `InMemoryRuleSource` is the bundled source,
//! seeded from the configuration file.

use super::{CacheError, CacheResult};
use crate::core::config::RuleDefinition;
use async_trait::async_trait;
use axum::http::Method;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// HTTP method a rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    /// Matches every method
    All,
}

impl RuleMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
            Self::All => "ALL",
        }
    }

    /// Whether a request with `method` falls under this rule
    pub fn applies_to(&self, method: &Method) -> bool {
        *self == Self::All || self.as_str() == method.as_str()
    }
}

impl FromStr for RuleMethod {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "ALL" => Ok(Self::All),
            other => Err(CacheError::InvalidRule {
                message: format!("unsupported method '{}'", other),
            }),
        }
    }
}

impl fmt::Display for RuleMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded against a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOutcome {
    Hit,
    Miss,
}

impl RuleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }
}

/// Per-rule hit/miss counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleStatistics {
    pub hits: u64,
    pub misses: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl RuleStatistics {
    /// Count one outcome and stamp the update time
    pub fn record(&mut self, outcome: RuleOutcome, now: DateTime<Utc>) {
        match outcome {
            RuleOutcome::Hit => self.add(1, 0, now),
            RuleOutcome::Miss => self.add(0, 1, now),
        }
    }

    /// Count a batch of outcomes and stamp the update time
    pub fn add(&mut self, hits: u64, misses: u64, now: DateTime<Utc>) {
        self.hits += hits;
        self.misses += misses;
        self.last_updated = Some(now);
    }
}

/// A caching rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRule {
    /// Identifier assigned by the rule source
    pub id: u64,

    /// Human-readable name, echoed in `X-Cache-Rule`
    pub name: String,

    /// Route pattern; `*` matches any run of characters
    pub route_pattern: String,

    /// Method the rule applies to
    pub method: RuleMethod,

    /// Disabled rules never match
    pub enabled: bool,

    /// TTL in seconds; zero stores without expiry
    pub ttl: u64,

    /// Higher priorities are tried first
    pub priority: i32,

    /// Hit/miss statistics
    #[serde(default)]
    pub statistics: RuleStatistics,
}

impl CacheRule {
    /// Create an enabled rule with priority zero
    pub fn new<N: Into<String>, P: Into<String>>(name: N, route_pattern: P, method: RuleMethod, ttl: u64) -> Self {
        Self {
            id: 0,
            name: name.into(),
            route_pattern: route_pattern.into(),
            method,
            enabled: true,
            ttl,
            priority: 0,
            statistics: RuleStatistics::default(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Build a rule from its configuration form
    pub fn from_definition(definition: &RuleDefinition, default_ttl: u64) -> CacheResult<Self> {
        if definition.route_pattern.trim().is_empty() {
            return Err(CacheError::InvalidRule {
                message: format!("rule '{}' has an empty route pattern", definition.name),
            });
        }

        let method = RuleMethod::from_str(&definition.method)?;
        let mut rule = Self::new(
            definition.name.clone(),
            definition.route_pattern.clone(),
            method,
            definition.ttl.unwrap_or(default_ttl),
        )
        .with_priority(definition.priority);
        rule.enabled = definition.enabled;
        Ok(rule)
    }
}

/// Persistent store of cache rules
#[async_trait]
pub trait RuleSource: Send + Sync {
    /// All enabled rules
    async fn fetch_enabled(&self) -> CacheResult<Vec<CacheRule>>;

    /// A single rule by id, enabled or not
    async fn find(&self, id: u64) -> CacheResult<Option<CacheRule>>;

    /// Overwrite a rule's statistics
    async fn save_statistics(&self, id: u64, statistics: RuleStatistics) -> CacheResult<()>;
}

/// Rule source kept in process memory
pub struct InMemoryRuleSource {
    rules: RwLock<Vec<CacheRule>>,
    next_id: AtomicU64,
}

impl InMemoryRuleSource {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Seed from configuration, assigning ids in declaration order
    pub fn from_definitions(definitions: &[RuleDefinition], default_ttl: u64) -> CacheResult<Self> {
        let source = Self::new();
        for definition in definitions {
            source.insert(CacheRule::from_definition(definition, default_ttl)?);
        }
        Ok(source)
    }

    /// Add a rule, assigning it the next id
    pub fn insert(&self, mut rule: CacheRule) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        rule.id = id;
        self.rules.write().push(rule);
        id
    }

    /// Enable or disable a rule; returns false for unknown ids
    pub fn set_enabled(&self, id: u64, enabled: bool) -> bool {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|rule| rule.id == id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Every rule, in insertion order
    pub fn all(&self) -> Vec<CacheRule> {
        self.rules.read().clone()
    }
}

impl Default for InMemoryRuleSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RuleSource for InMemoryRuleSource {
    async fn fetch_enabled(&self) -> CacheResult<Vec<CacheRule>> {
        Ok(self.rules.read().iter().filter(|rule| rule.enabled).cloned().collect())
    }

    async fn find(&self, id: u64) -> CacheResult<Option<CacheRule>> {
        Ok(self.rules.read().iter().find(|rule| rule.id == id).cloned())
    }

    async fn save_statistics(&self, id: u64, statistics: RuleStatistics) -> CacheResult<()> {
        let mut rules = self.rules.write();
        match rules.iter_mut().find(|rule| rule.id == id) {
            Some(rule) => {
                rule.statistics = statistics;
                Ok(())
            }
            None => Err(CacheError::RuleSource {
                message: format!("rule {} not found", id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(name: &str, method: &str, ttl: Option<u64>) -> RuleDefinition {
        RuleDefinition {
            name: name.to_string(),
            route_pattern: "/api/courses/*".to_string(),
            method: method.to_string(),
            enabled: true,
            ttl,
            priority: 5,
        }
    }

    #[test]
    fn test_method_parsing_and_matching() {
        assert_eq!("get".parse::<RuleMethod>().unwrap(), RuleMethod::Get);
        assert_eq!("ALL".parse::<RuleMethod>().unwrap(), RuleMethod::All);
        assert!("FETCH".parse::<RuleMethod>().is_err());

        assert!(RuleMethod::Get.applies_to(&Method::GET));
        assert!(!RuleMethod::Get.applies_to(&Method::POST));
        assert!(RuleMethod::All.applies_to(&Method::DELETE));
    }

    #[test]
    fn test_method_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&RuleMethod::Patch).unwrap(), "\"PATCH\"");
    }

    #[test]
    fn test_statistics_record() {
        let mut stats = RuleStatistics::default();
        let now = Utc::now();
        stats.record(RuleOutcome::Hit, now);
        stats.record(RuleOutcome::Miss, now);
        stats.record(RuleOutcome::Hit, now);

        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.last_updated, Some(now));
    }

    #[test]
    fn test_from_definition_applies_default_ttl() {
        let rule = CacheRule::from_definition(&definition("courses", "GET", None), 3600).unwrap();
        assert_eq!(rule.ttl, 3600);
        assert_eq!(rule.priority, 5);

        let rule = CacheRule::from_definition(&definition("courses", "GET", Some(0)), 3600).unwrap();
        assert_eq!(rule.ttl, 0);

        assert!(CacheRule::from_definition(&definition("bad", "FETCH", None), 60).is_err());
    }

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemoryRuleSource::new();
        let first = source.insert(CacheRule::new("a", "/api/a", RuleMethod::Get, 60));
        let second = source.insert(CacheRule::new("b", "/api/b", RuleMethod::Get, 60).disabled());
        assert_eq!((first, second), (1, 2));

        let enabled = source.fetch_enabled().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].name, "a");

        assert!(source.find(second).await.unwrap().is_some());
        assert!(source.set_enabled(second, true));
        assert_eq!(source.fetch_enabled().await.unwrap().len(), 2);

        let stats = RuleStatistics {
            hits: 3,
            misses: 1,
            last_updated: Some(Utc::now()),
        };
        source.save_statistics(first, stats.clone()).await.unwrap();
        assert_eq!(source.find(first).await.unwrap().unwrap().statistics, stats);
        assert!(source.save_statistics(99, stats).await.is_err());
    }
}
