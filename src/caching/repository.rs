//! # Rule Repository
//!
//! Owns the snapshot of enabled rules shared by the middleware and the
//! invalidation pipeline. Snapshots are immutable and swapped wholesale through
//! `ArcSwapOption`, so a request keeps using the snapshot it loaded even if a
//! refresh lands halfway through.

use super::matcher::CompiledRule;
use super::rules::{CacheRule, RuleOutcome, RuleSource};
use super::CacheResult;
use arc_swap::ArcSwapOption;
use axum::http::Method;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Enabled rules in priority order, with compiled patterns
#[derive(Debug)]
pub struct RuleSnapshot {
    rules: Vec<CompiledRule>,
    fetched_at: Instant,
}

impl RuleSnapshot {
    /// Sort by priority (descending, stable) and compile every pattern
    pub fn build(mut rules: Vec<CacheRule>) -> Self {
        rules.retain(|rule| rule.enabled);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        let rules = rules
            .into_iter()
            .filter_map(|rule| {
                let name = rule.name.clone();
                match CompiledRule::compile(rule) {
                    Ok(compiled) => Some(compiled),
                    Err(e) => {
                        warn!("Skipping cache rule '{}' with unusable pattern: {}", name, e);
                        None
                    }
                }
            })
            .collect();

        Self {
            rules,
            fetched_at: Instant::now(),
        }
    }

    pub fn empty() -> Self {
        Self::build(Vec::new())
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// First rule in priority order that matches
    pub fn find_match(&self, path: &str, method: &Method) -> Option<&CompiledRule> {
        self.rules.iter().find(|compiled| compiled.matches(path, method))
    }
}

/// Shared handle to the rule snapshot and the rule source behind it
#[derive(Clone)]
pub struct RuleRepository {
    source: Arc<dyn RuleSource>,
    snapshot: Arc<ArcSwapOption<RuleSnapshot>>,
    stale_after: Duration,
    refreshing: Arc<AtomicBool>,
    pending: Arc<DashMap<u64, Arc<PendingOutcomes>>>,
}

/// Outcomes recorded for one rule but not yet written to the source
#[derive(Default)]
struct PendingOutcomes {
    hits: AtomicU64,
    misses: AtomicU64,

    /// Set while a writer task owns this rule
    flushing: AtomicBool,
}

impl PendingOutcomes {
    fn add(&self, outcome: RuleOutcome) {
        match outcome {
            RuleOutcome::Hit => self.hits.fetch_add(1, Ordering::AcqRel),
            RuleOutcome::Miss => self.misses.fetch_add(1, Ordering::AcqRel),
        };
    }

    fn take(&self) -> (u64, u64) {
        (self.hits.swap(0, Ordering::AcqRel), self.misses.swap(0, Ordering::AcqRel))
    }

    fn is_empty(&self) -> bool {
        self.hits.load(Ordering::Acquire) == 0 && self.misses.load(Ordering::Acquire) == 0
    }

    fn try_claim(&self) -> bool {
        self.flushing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl RuleRepository {
    pub fn new(source: Arc<dyn RuleSource>, stale_after: Duration) -> Self {
        Self {
            source,
            snapshot: Arc::new(ArcSwapOption::empty()),
            stale_after,
            refreshing: Arc::new(AtomicBool::new(false)),
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Fetch enabled rules and swap in a new snapshot
    ///
    /// A failed fetch keeps the previous snapshot. With no previous snapshot an
    /// empty one is returned but not stored, so the next reader tries again.
    pub async fn refresh(&self) -> Arc<RuleSnapshot> {
        match self.source.fetch_enabled().await {
            Ok(rules) => {
                let snapshot = Arc::new(RuleSnapshot::build(rules));
                self.snapshot.store(Some(snapshot.clone()));
                debug!("Loaded {} cache rules", snapshot.len());
                snapshot
            }
            Err(e) => {
                debug!("Cache rules not loaded: {}", e);
                self.snapshot
                    .load_full()
                    .unwrap_or_else(|| Arc::new(RuleSnapshot::empty()))
            }
        }
    }

    /// Snapshot for one request
    ///
    /// Loads synchronously the first time; afterwards a stale snapshot is still
    /// returned while a single background refresh replaces it.
    pub async fn current_snapshot(&self) -> Arc<RuleSnapshot> {
        match self.snapshot.load_full() {
            Some(snapshot) => {
                if snapshot.age() > self.stale_after {
                    self.spawn_background_refresh();
                }
                snapshot
            }
            None => self.refresh().await,
        }
    }

    fn spawn_background_refresh(&self) {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let repository = self.clone();
        tokio::spawn(async move {
            repository.refresh().await;
            repository.refreshing.store(false, Ordering::Release);
        });
    }

    /// Enabled rules straight from the source, bypassing the snapshot
    pub async fn fetch_enabled(&self) -> CacheResult<Vec<CacheRule>> {
        self.source.fetch_enabled().await
    }

    /// Record a hit or miss against a rule without blocking the caller
    ///
    /// Outcomes are counted in memory and written by at most one task per
    /// rule, which folds everything recorded meanwhile into a single update.
    /// Returns the writer's handle when this call started one; failures only
    /// reach the logs.
    pub fn record_outcome(&self, rule_id: u64, outcome: RuleOutcome) -> Option<JoinHandle<()>> {
        let pending = self.pending.entry(rule_id).or_default().clone();
        pending.add(outcome);

        if !pending.try_claim() {
            return None;
        }

        let source = self.source.clone();
        Some(tokio::spawn(flush_outcomes(source, rule_id, pending)))
    }

    /// Refresh the snapshot on a fixed interval
    pub fn spawn_refresh_task(&self, interval: Duration) -> JoinHandle<()> {
        let repository = self.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let snapshot = repository.refresh().await;
                debug!("Periodic rule refresh: {} rules active", snapshot.len());
            }
        })
    }

    /// Load the snapshot eagerly at start-up
    pub async fn init(&self) -> usize {
        let snapshot = self.refresh().await;
        info!("Cache rule repository initialised with {} rules", snapshot.len());
        snapshot.len()
    }
}

async fn flush_outcomes(source: Arc<dyn RuleSource>, rule_id: u64, pending: Arc<PendingOutcomes>) {
    loop {
        let (hits, misses) = pending.take();

        if hits == 0 && misses == 0 {
            pending.flushing.store(false, Ordering::Release);
            // An outcome may have landed after the swap; whoever claims next writes it
            if pending.is_empty() || !pending.try_claim() {
                return;
            }
            continue;
        }

        if let Err(e) = apply_outcomes(source.as_ref(), rule_id, hits, misses).await {
            debug!("Failed to update cache stats for rule {}: {}", rule_id, e);
        }
    }
}

async fn apply_outcomes(source: &dyn RuleSource, rule_id: u64, hits: u64, misses: u64) -> CacheResult<()> {
    let Some(rule) = source.find(rule_id).await? else {
        return Ok(());
    };

    let mut statistics = rule.statistics;
    statistics.add(hits, misses, Utc::now());
    source.save_statistics(rule_id, statistics).await
}
