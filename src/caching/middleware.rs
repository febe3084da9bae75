//! # Cache Middleware
//!
//! axum middleware that serves matched GET requests from the cache and stores
//! successful responses on a miss.
//!
//! Request flow:
//! 1. Paths outside the API prefix, or under an excluded prefix, pass through
//! 2. With the store unavailable, no matching rule or a non-GET method the
//!    request proceeds without caching and without cache headers
//! 3. A cached entry is served directly (`X-Cache: HIT`)
//! 4. Otherwise the handler runs; a 200 with a non-empty body is stored
//!    (`X-Cache: MISS`)
//!
//! Hit/miss statistics are recorded on detached tasks.

use super::matcher::RuleMatcher;
use super::repository::RuleRepository;
use super::rules::{CacheRule, RuleOutcome};
use super::store::CacheStore;
use crate::core::config::CacheConfig;
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
pub const X_CACHE_RULE: HeaderName = HeaderName::from_static("x-cache-rule");
pub const X_CACHE_TTL: HeaderName = HeaderName::from_static("x-cache-ttl");

/// Stored body: UTF-8 text as-is, anything else base64 encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum CachedBody {
    Utf8(String),
    Base64(String),
}

impl CachedBody {
    pub fn encode(bytes: &[u8]) -> Self {
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::Utf8(text.to_string()),
            Err(_) => Self::Base64(BASE64.encode(bytes)),
        }
    }

    /// `None` when a base64 payload is corrupt
    pub fn decode(self) -> Option<Vec<u8>> {
        match self {
            Self::Utf8(text) => Some(text.into_bytes()),
            Self::Base64(data) => BASE64.decode(data).ok(),
        }
    }
}

/// Cached response as stored in the key-value store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Content type of the original response, if any
    pub content_type: Option<String>,

    /// Response body
    pub body: CachedBody,

    /// When the entry was written
    pub cached_at: chrono::DateTime<chrono::Utc>,
}

impl CachedResponse {
    fn into_hit_response(self, rule: &CacheRule) -> Option<Response> {
        let mut response = (StatusCode::OK, self.body.decode()?).into_response();

        let headers = response.headers_mut();
        // IntoResponse for Vec<u8> sets application/octet-stream
        headers.remove(header::CONTENT_TYPE);
        if let Some(content_type) = self.content_type.as_deref().and_then(|v| HeaderValue::from_str(v).ok()) {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        apply_cache_headers(headers, RuleOutcome::Hit, rule);

        Some(response)
    }
}

/// Path rules and size limit for the middleware
#[derive(Debug, Clone)]
struct CachePolicy {
    api_prefix: String,
    excluded_prefixes: Vec<String>,
    max_body_bytes: usize,
}

impl CachePolicy {
    fn bypasses(&self, path: &str) -> bool {
        !path.starts_with(&self.api_prefix)
            || self
                .excluded_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Shared state for [`cache_middleware`]
#[derive(Clone)]
pub struct CacheLayerState {
    store: Arc<CacheStore>,
    matcher: RuleMatcher,
    repository: RuleRepository,
    policy: Arc<CachePolicy>,
}

impl CacheLayerState {
    pub fn new(store: Arc<CacheStore>, repository: RuleRepository, config: &CacheConfig) -> Self {
        Self {
            store,
            matcher: RuleMatcher::new(repository.clone()),
            repository,
            policy: Arc::new(CachePolicy {
                api_prefix: config.api_prefix.clone(),
                excluded_prefixes: config.excluded_prefixes.clone(),
                max_body_bytes: config.max_body_bytes,
            }),
        }
    }
}

/// Cache key for a request: `api:` followed by path and query
pub fn cache_key(uri: &Uri) -> String {
    let path_and_query = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
    format!("api:{}", path_and_query)
}

fn apply_cache_headers(headers: &mut HeaderMap, outcome: RuleOutcome, rule: &CacheRule) {
    let status = match outcome {
        RuleOutcome::Hit => "HIT",
        RuleOutcome::Miss => "MISS",
    };
    headers.insert(X_CACHE, HeaderValue::from_static(status));

    // Rule names are free text and may not be valid header values
    match HeaderValue::from_str(&rule.name) {
        Ok(name) => {
            headers.insert(X_CACHE_RULE, name);
        }
        Err(_) => debug!("Rule name {:?} is not a valid header value", rule.name),
    }
    headers.insert(X_CACHE_TTL, HeaderValue::from(rule.ttl));
}

fn declared_length(headers: &HeaderMap) -> Option<usize> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse().ok())
}

fn count_request(outcome: RuleOutcome, rule: &CacheRule) {
    metrics::counter!(
        "api_cache_requests_total",
        "outcome" => outcome.as_str(),
        "rule" => rule.name.clone()
    )
    .increment(1);
}

/// Response caching middleware, installed with `middleware::from_fn_with_state`
pub async fn cache_middleware(State(state): State<CacheLayerState>, request: Request, next: Next) -> Response {
    if state.policy.bypasses(request.uri().path()) {
        return next.run(request).await;
    }

    if !state.store.is_available() {
        return next.run(request).await;
    }

    let Some(rule) = state.matcher.find_match(request.uri().path(), request.method()).await else {
        return next.run(request).await;
    };

    // Rules may name any method, but only GET responses are cached
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = cache_key(request.uri());

    if let Some(cached) = state.store.get::<CachedResponse>(&key).await {
        match cached.into_hit_response(&rule) {
            Some(response) => {
                debug!("Cache hit for key: {} (rule: {})", key, rule.name);
                state.repository.record_outcome(rule.id, RuleOutcome::Hit);
                count_request(RuleOutcome::Hit, &rule);
                return response;
            }
            None => warn!("Discarding undecodable cache body for key: {}", key),
        }
    }

    let response = next.run(request).await;

    if response.status() != StatusCode::OK {
        return response;
    }

    if declared_length(response.headers()).map_or(false, |len| len > state.policy.max_body_bytes) {
        debug!("Response for {} exceeds cacheable size, not caching", key);
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            // Keep the handler's status; the body is already lost
            warn!("Failed to read response body for {}, not caching: {}", key, e);
            parts.headers.remove(header::CONTENT_LENGTH);
            return Response::from_parts(parts, Body::empty());
        }
    };

    if bytes.is_empty() || bytes.len() > state.policy.max_body_bytes {
        return Response::from_parts(parts, Body::from(bytes));
    }

    let entry = CachedResponse {
        content_type: parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from),
        body: CachedBody::encode(&bytes),
        cached_at: chrono::Utc::now(),
    };

    if !state.store.set(&key, &entry, rule.ttl).await {
        debug!("Cache write skipped for key: {}", key);
    }

    apply_cache_headers(&mut parts.headers, RuleOutcome::Miss, &rule);
    state.repository.record_outcome(rule.id, RuleOutcome::Miss);
    count_request(RuleOutcome::Miss, &rule);
    debug!("Cache miss for key: {} (rule: {})", key, rule.name);

    Response::from_parts(parts, Body::from(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::rules::{InMemoryRuleSource, RuleMethod};
    use crate::caching::stores::{InMemoryBackend, KeyValueBackend};
    use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tower::ServiceExt;

    fn request(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn app(rules: Vec<CacheRule>, calls: Arc<AtomicUsize>) -> (Router, Arc<InMemoryBackend>) {
        let source = Arc::new(InMemoryRuleSource::new());
        for rule in rules {
            source.insert(rule);
        }
        let backend = Arc::new(InMemoryBackend::new());
        let store = Arc::new(CacheStore::new(backend.clone()));
        let repository = RuleRepository::new(source, Duration::from_secs(60));
        let state = CacheLayerState::new(store, repository, &CacheConfig::default());

        let router = Router::new()
            .route(
                "/api/courses",
                get(move || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Json(json!({"data": ["rust"]}))
                    }
                }),
            )
            .route("/api/cache-rules", get(|| async { "rules" }))
            .route(
                "/api/broken",
                get(|| async {
                    let chunks: Vec<Result<&'static str, std::io::Error>> = vec![
                        Ok("partial"),
                        Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upstream reset")),
                    ];
                    Body::from_stream(futures::stream::iter(chunks))
                }),
            )
            .layer(from_fn_with_state(state, cache_middleware));

        (router, backend)
    }

    #[test]
    fn test_cache_key_includes_query() {
        assert_eq!(cache_key(&"/api/courses?page=2".parse().unwrap()), "api:/api/courses?page=2");
        assert_eq!(cache_key(&"/api/courses".parse().unwrap()), "api:/api/courses");
    }

    #[test]
    fn test_policy_bypass() {
        let policy = CachePolicy {
            api_prefix: "/api/".to_string(),
            excluded_prefixes: vec!["/api/cache-rules".to_string()],
            max_body_bytes: 1024,
        };
        assert!(policy.bypasses("/health"));
        assert!(policy.bypasses("/api/cache-rules/1"));
        assert!(!policy.bypasses("/api/courses"));
    }

    #[tokio::test]
    async fn test_miss_then_hit_preserves_body_and_content_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (app, backend) = app(vec![CacheRule::new("courses", "/api/courses", RuleMethod::Get, 30)], calls.clone());

        let first = app.clone().oneshot(request("/api/courses")).await.unwrap();
        assert_eq!(first.headers()[&X_CACHE], "MISS");
        assert_eq!(first.headers()[&X_CACHE_RULE], "courses");
        assert_eq!(first.headers()[&X_CACHE_TTL], "30");
        let first_body = to_bytes(first.into_body(), usize::MAX).await.unwrap();
        assert!(backend.contains_key("api:/api/courses"));

        let second = app.oneshot(request("/api/courses")).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.headers()[&X_CACHE], "HIT");
        assert_eq!(second.headers()[header::CONTENT_TYPE], "application/json");
        let second_body = to_bytes(second.into_body(), usize::MAX).await.unwrap();

        assert_eq!(first_body, second_body);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmatched_and_excluded_paths_pass_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (app, backend) = app(vec![CacheRule::new("all", "/api/*", RuleMethod::All, 30)], calls);

        let response = app.oneshot(request("/api/cache-rules")).await.unwrap();
        assert!(response.headers().get(&X_CACHE).is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_passes_through() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (app, backend) = app(vec![CacheRule::new("courses", "/api/courses", RuleMethod::Get, 30)], calls.clone());
        backend.set_ready(false);

        for _ in 0..2 {
            let response = app.clone().oneshot(request("/api/courses")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(response.headers().get(&X_CACHE).is_none());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_body_read_failure_keeps_handler_status() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (app, backend) = app(vec![CacheRule::new("all", "/api/*", RuleMethod::Get, 30)], calls);

        let response = app.oneshot(request("/api/broken")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(&X_CACHE).is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_text_bodies_are_stored_as_text() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (app, backend) = app(vec![CacheRule::new("courses", "/api/courses", RuleMethod::Get, 30)], calls);
        app.oneshot(request("/api/courses")).await.unwrap();

        let raw = backend.get("api:/api/courses").await.unwrap().unwrap();
        let stored: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stored["body"]["encoding"], "utf8");
        assert_eq!(stored["body"]["data"], r#"{"data":["rust"]}"#);
    }

    #[test]
    fn test_binary_bodies_use_base64() {
        let body = CachedBody::encode(&[0xff, 0x00, 0x7f]);
        assert_eq!(body, CachedBody::Base64("/wB/".to_string()));
        assert_eq!(body.decode(), Some(vec![0xff, 0x00, 0x7f]));

        assert_eq!(CachedBody::Base64("%%%".to_string()).decode(), None);
    }

    #[test]
    fn test_invalid_rule_name_skips_header() {
        let mut headers = HeaderMap::new();
        let rule = CacheRule::new("bad\nname", "/api/x", RuleMethod::Get, 5);
        apply_cache_headers(&mut headers, RuleOutcome::Miss, &rule);

        assert_eq!(headers[&X_CACHE], "MISS");
        assert!(headers.get(&X_CACHE_RULE).is_none());
        assert_eq!(headers[&X_CACHE_TTL], "5");
    }
}
