//! # Configuration Module
//!
//! Configuration structures and loading for the cache service.
//!
//! ## Key Features
//! - YAML configuration parsing with serde (every section has defaults)
//! - Environment variable overrides for the Redis connection and default TTL
//! - Validation that collects every problem into a single error

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

use crate::caching::RuleMethod;
use crate::core::error::{ServiceError, ServiceResult};

/// Main service configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP listener settings
    pub server: ServerConfig,

    /// Key-value store connection settings
    pub redis: RedisConfig,

    /// Cache middleware and rule repository settings
    pub cache: CacheConfig,

    /// Rule definitions seeding the bundled rule source
    pub rules: Vec<RuleDefinition>,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file, apply environment overrides and validate
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> ServiceResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ServiceError::config(format!("Failed to read config file: {}", e)))?;

        let mut config = Self::from_yaml(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string without overrides or validation
    pub fn from_yaml(content: &str) -> ServiceResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Apply overrides from the process environment
    ///
    /// Recognised variables: `REDIS_HOST`, `REDIS_PORT`, `REDIS_PASSWORD`,
    /// `REDIS_DB`, `REDIS_ENABLED`, `CACHE_TTL`, `CACHE_SERVER_PORT`,
    /// `CACHE_ADMIN_TOKEN` and `CACHE_LOG_LEVEL`.
    pub fn apply_env_overrides(&mut self) -> ServiceResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> ServiceResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("REDIS_HOST") {
            self.redis.host = host;
        }

        if let Some(port) = lookup("REDIS_PORT") {
            self.redis.port = parse_var("REDIS_PORT", &port)?;
        }

        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.redis.password = if password.is_empty() { None } else { Some(password) };
        }

        if let Some(db) = lookup("REDIS_DB") {
            self.redis.db = parse_var("REDIS_DB", &db)?;
        }

        if let Some(enabled) = lookup("REDIS_ENABLED") {
            // Only the literal "true" enables the store
            self.redis.enabled = enabled.trim().eq_ignore_ascii_case("true");
        }

        if let Some(ttl) = lookup("CACHE_TTL") {
            self.redis.default_ttl = parse_var("CACHE_TTL", &ttl)?;
        }

        if let Some(port) = lookup("CACHE_SERVER_PORT") {
            self.server.port = parse_var("CACHE_SERVER_PORT", &port)?;
        }

        if let Some(token) = lookup("CACHE_ADMIN_TOKEN") {
            self.server.admin_token = if token.is_empty() { None } else { Some(token) };
        }

        if let Some(level) = lookup("CACHE_LOG_LEVEL") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Configuration validation with detailed error messages
    pub fn validate(&self) -> ServiceResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.redis.backend == StoreBackend::Redis {
            if self.redis.host.is_empty() {
                errors.push("redis host cannot be empty".to_string());
            }
            if self.redis.port == 0 {
                errors.push("redis port must be greater than 0".to_string());
            }
        }

        if self.redis.db < 0 {
            errors.push(format!("redis db index must not be negative, got {}", self.redis.db));
        }

        if self.redis.connect_timeout.is_zero() {
            errors.push("redis connect_timeout must be greater than 0".to_string());
        }

        if self.redis.operation_timeout.is_zero() {
            errors.push("redis operation_timeout must be greater than 0".to_string());
        }

        if self.redis.retry_cap < self.redis.retry_step {
            errors.push("redis retry_cap must not be smaller than retry_step".to_string());
        }

        if !self.cache.api_prefix.starts_with('/') {
            errors.push(format!("cache api_prefix must start with '/', got '{}'", self.cache.api_prefix));
        }

        if self.redis.health_check_interval.is_zero() {
            errors.push("redis health_check_interval must be greater than 0".to_string());
        }

        if self.cache.rules_refresh_interval.is_zero() {
            errors.push("cache rules_refresh_interval must be greater than 0".to_string());
        }

        for (index, rule) in self.rules.iter().enumerate() {
            if rule.name.trim().is_empty() {
                errors.push(format!("Rule {} has empty name", index));
            }
            if rule.route_pattern.trim().is_empty() {
                errors.push(format!("Rule '{}' has empty route_pattern", rule.name));
            }
            if RuleMethod::from_str(&rule.method).is_err() {
                errors.push(format!("Rule '{}' has invalid HTTP method: {}", rule.name, rule.method));
            }
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => errors.push(format!("Invalid log level: {}", self.logging.level)),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "text" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if !errors.is_empty() {
            return Err(ServiceError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

fn parse_var<T>(name: &str, value: &str) -> ServiceResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ServiceError::config(format!("Invalid {}: {}", name, e)))
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address
    pub bind_address: String,

    /// HTTP port
    pub port: u16,

    /// Bearer token granting operator access to the admin endpoints
    pub admin_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 1337,
            admin_token: None,
        }
    }
}

/// Which key-value backend the store adapter talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Key-value store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Backend implementation
    pub backend: StoreBackend,

    /// Redis host
    pub host: String,

    /// Redis port
    pub port: u16,

    /// Optional password
    pub password: Option<String>,

    /// Logical database index
    pub db: i64,

    /// Master switch; a disabled store never reports available
    pub enabled: bool,

    /// Default TTL in seconds for rules that do not declare one
    pub default_ttl: u64,

    /// Maximum connection attempts at start-up
    pub max_retries: u32,

    /// Backoff step between connection attempts
    #[serde(with = "humantime_serde")]
    pub retry_step: Duration,

    /// Upper bound for the connection backoff
    #[serde(with = "humantime_serde")]
    pub retry_cap: Duration,

    /// Timeout for establishing a connection
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout applied to every store command
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Duration,

    /// Interval between readiness pings
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            db: 0,
            enabled: false,
            default_ttl: 3600,
            max_retries: 3,
            retry_step: Duration::from_millis(50),
            retry_cap: Duration::from_millis(2000),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Build the `redis://` connection URL, percent-encoding the password
    pub fn connection_url(&self) -> ServiceResult<String> {
        let mut url = Url::parse(&format!("redis://{}:{}/{}", self.host, self.port, self.db))
            .map_err(|e| ServiceError::config(format!("Invalid redis address: {}", e)))?;

        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| ServiceError::config("Cannot set redis password on URL"))?;
        }

        Ok(url.to_string())
    }

    /// Delay before connection attempt `attempt` (1-based): `min(attempt * step, cap)`
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_step.saturating_mul(attempt).min(self.retry_cap)
    }
}

/// Cache middleware and rule repository configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Only paths under this prefix are considered for caching
    pub api_prefix: String,

    /// Paths under these prefixes always bypass the cache
    pub excluded_prefixes: Vec<String>,

    /// Responses declaring a larger Content-Length are never buffered
    pub max_body_bytes: usize,

    /// Staleness window of the rule snapshot
    #[serde(with = "humantime_serde")]
    pub rules_refresh_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            excluded_prefixes: vec!["/api/cache-rules".to_string()],
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            rules_refresh_interval: Duration::from_secs(60),
        }
    }
}

/// Rule definition as written in the configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    /// Human-readable rule name
    pub name: String,

    /// Route pattern with `*` wildcards
    pub route_pattern: String,

    /// HTTP method or `ALL`
    #[serde(default = "default_rule_method")]
    pub method: String,

    /// Disabled rules are never matched
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// TTL in seconds; falls back to `redis.default_ttl`
    #[serde(default)]
    pub ttl: Option<u64>,

    /// Higher priorities win
    #[serde(default)]
    pub priority: i32,
}

fn default_rule_method() -> String {
    "GET".to_string()
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = AppConfig::from_yaml("redis:\n  host: cache.internal\n").unwrap();
        assert_eq!(config.redis.host, "cache.internal");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.cache.api_prefix, "/api/");
        assert_eq!(config.cache.rules_refresh_interval, Duration::from_secs(60));
        assert!(config.rules.is_empty());
    }

    #[tokio::test]
    async fn test_load_config_from_yaml_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("cache.yaml");

        let config_content = r#"
server:
  bind_address: "127.0.0.1"
  port: 8081
redis:
  backend: memory
  enabled: true
  default_ttl: 120
  connect_timeout: "2s"
cache:
  rules_refresh_interval: "30s"
rules:
  - name: courses
    route_pattern: /api/courses/*
    ttl: 30
    priority: 10
  - name: everything
    route_pattern: /api/*
    method: ALL
logging:
  level: debug
  format: text
"#;
        tokio::fs::write(&config_path, config_content).await.unwrap();

        let config = AppConfig::load_from_file(&config_path).await.unwrap();
        assert_eq!(config.server.port, 8081);
        assert_eq!(config.redis.backend, StoreBackend::Memory);
        assert_eq!(config.redis.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.cache.rules_refresh_interval, Duration::from_secs(30));
        assert_eq!(config.rules.len(), 2);
        assert_eq!(config.rules[0].ttl, Some(30));
        assert_eq!(config.rules[1].method, "ALL");
        assert!(config.rules[1].enabled);
        assert_eq!(config.rules[1].ttl, None);
    }

    #[test]
    fn test_malformed_yaml_is_yaml_error() {
        let result = AppConfig::from_yaml("redis: [unclosed");
        assert!(matches!(result, Err(ServiceError::Yaml { .. })));
    }

    #[test]
    fn test_zero_health_check_interval_is_rejected() {
        let mut config = AppConfig::default();
        config.redis.health_check_interval = Duration::ZERO;

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("health_check_interval must be greater than 0"));
    }

    #[tokio::test]
    async fn test_missing_file_is_configuration_error() {
        let result = AppConfig::load_from_file("/definitely/not/here.yaml").await;
        assert!(matches!(result, Err(ServiceError::Configuration { .. })));
    }

    #[test]
    fn test_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(lookup_from(&[
                ("REDIS_HOST", "redis.svc"),
                ("REDIS_PORT", "6380"),
                ("REDIS_PASSWORD", "s3cret"),
                ("REDIS_DB", "2"),
                ("REDIS_ENABLED", "true"),
                ("CACHE_TTL", "90"),
                ("CACHE_ADMIN_TOKEN", "op-token"),
                ("CACHE_LOG_LEVEL", "warn"),
            ]))
            .unwrap();

        assert_eq!(config.redis.host, "redis.svc");
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.password.as_deref(), Some("s3cret"));
        assert_eq!(config.redis.db, 2);
        assert!(config.redis.enabled);
        assert_eq!(config.redis.default_ttl, 90);
        assert_eq!(config.server.admin_token.as_deref(), Some("op-token"));
        assert_eq!(config.logging.level, "warn");
    }

    #[test]
    fn test_enabled_override_requires_literal_true() {
        let mut config = AppConfig::default();
        config.redis.enabled = true;
        config.apply_overrides(lookup_from(&[("REDIS_ENABLED", "yes")])).unwrap();
        assert!(!config.redis.enabled);
    }

    #[test]
    fn test_invalid_override() {
        let mut config = AppConfig::default();
        let result = config.apply_overrides(lookup_from(&[("REDIS_PORT", "not_a_port")]));
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid REDIS_PORT"));
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = AppConfig::default();
        config.redis.host.clear();
        config.logging.level = "loud".to_string();
        config.rules.push(RuleDefinition {
            name: "broken".to_string(),
            route_pattern: "/api/x".to_string(),
            method: "FETCH".to_string(),
            enabled: true,
            ttl: None,
            priority: 0,
        });

        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("redis host cannot be empty"));
        assert!(message.contains("Invalid log level: loud"));
        assert!(message.contains("invalid HTTP method: FETCH"));
    }

    #[test]
    fn test_connection_url() {
        let mut redis = RedisConfig {
            host: "localhost".to_string(),
            port: 6390,
            db: 3,
            ..Default::default()
        };
        assert_eq!(redis.connection_url().unwrap(), "redis://localhost:6390/3");

        redis.password = Some("p@ss".to_string());
        assert_eq!(redis.connection_url().unwrap(), "redis://:p%40ss@localhost:6390/3");
    }

    #[test]
    fn test_retry_delay_is_monotonic_and_capped() {
        let redis = RedisConfig::default();
        assert_eq!(redis.retry_delay(1), Duration::from_millis(50));
        assert_eq!(redis.retry_delay(10), Duration::from_millis(500));
        assert_eq!(redis.retry_delay(40), Duration::from_millis(2000));
        assert_eq!(redis.retry_delay(1000), Duration::from_millis(2000));
    }
}
