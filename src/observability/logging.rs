//! # Structured Logging
//!
//! Installs the global `tracing` subscriber. `RUST_LOG`, when set, takes
//! precedence over the configured level.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::core::config::LoggingConfig;
use crate::core::error::{ServiceError, ServiceResult};

/// Default directives for a level: this crate at `level`, HTTP tracing at info
pub fn default_directives(level: &str) -> String {
    format!("api_cache={},tower_http=info", level.to_lowercase())
}

fn build_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)))
}

/// Initialise the global subscriber in json or text format
pub fn init_logging(config: &LoggingConfig) -> ServiceResult<()> {
    let registry = tracing_subscriber::registry().with(build_filter(config));

    let result = if config.format.eq_ignore_ascii_case("text") {
        registry.with(fmt::layer().with_target(true)).try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_current_span(true),
            )
            .try_init()
    };

    result.map_err(|e| ServiceError::internal(format!("Failed to initialise logging: {}", e)))
}
