//! # Rule Matcher
//!
//! Route patterns are literal paths with `*` wildcards. A `*` matches any run
//! of characters, slashes included, and patterns are anchored to the whole
//! path. Query strings never take part in matching.

use super::repository::RuleRepository;
use super::rules::CacheRule;
use axum::http::Method;
use regex::Regex;

/// Prefix that entity-name inference expects route patterns to start with
const API_PATH_PREFIX: &str = "/api/";

/// A route pattern compiled to an anchored regex
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    /// Compile a pattern; surrounding whitespace is ignored
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let source = pattern.trim().to_string();
        let body = source
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{}$", body))?;

        Ok(Self { source, regex })
    }

    /// The trimmed pattern text
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a request path; anything after `?` is ignored
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(strip_query(path))
    }
}

fn strip_query(path: &str) -> &str {
    path.split_once('?').map_or(path, |(path, _)| path)
}

/// One-off pattern check without keeping the compiled form
pub fn pattern_matches(path: &str, pattern: &str) -> bool {
    CompiledPattern::compile(pattern).map_or(false, |compiled| compiled.is_match(path))
}

/// Entity type name implied by a route pattern
///
/// Takes the first segment after `/api/` up to the next `/` or `*` and
/// singularizes it: `/api/categories/details` gives `category`, `/api/courses`
/// gives `course`. Patterns outside `/api/` yield `None`.
pub fn infer_entity_name(route_pattern: &str) -> Option<String> {
    let rest = route_pattern.trim().strip_prefix(API_PATH_PREFIX)?;
    let segment = rest.split(|c| c == '/' || c == '*').next().unwrap_or_default();

    if segment.is_empty() {
        None
    } else {
        Some(singularize(segment))
    }
}

/// `ies` becomes `y`, otherwise one trailing `s` is dropped
pub fn singularize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix("ies") {
        format!("{}y", stem)
    } else if let Some(stem) = word.strip_suffix('s') {
        stem.to_string()
    } else {
        word.to_string()
    }
}

/// An enabled rule stored with its compiled pattern
#[derive(Debug, Clone)]
pub struct CompiledRule {
    rule: CacheRule,
    pattern: CompiledPattern,
}

impl CompiledRule {
    pub fn compile(rule: CacheRule) -> Result<Self, regex::Error> {
        let pattern = CompiledPattern::compile(&rule.route_pattern)?;
        Ok(Self { rule, pattern })
    }

    pub fn rule(&self) -> &CacheRule {
        &self.rule
    }

    pub fn pattern(&self) -> &CompiledPattern {
        &self.pattern
    }

    /// Method check first, then the path
    pub fn matches(&self, path: &str, method: &Method) -> bool {
        self.rule.enabled && self.rule.method.applies_to(method) && self.pattern.is_match(path)
    }
}

/// Finds the rule that governs a request
#[derive(Clone)]
pub struct RuleMatcher {
    repository: RuleRepository,
}

impl RuleMatcher {
    pub fn new(repository: RuleRepository) -> Self {
        Self { repository }
    }

    /// Highest-priority enabled rule matching the request, from one snapshot
    pub async fn find_match(&self, path: &str, method: &Method) -> Option<CacheRule> {
        let snapshot = self.repository.current_snapshot().await;
        snapshot.find_match(path, method).map(|compiled| compiled.rule().clone())
    }
}
