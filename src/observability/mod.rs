//! # Observability Module
//!
//! Structured logging through `tracing` and Prometheus metrics through the
//! `metrics` facade.

pub mod logging;
pub mod metrics;

pub use self::logging::init_logging;
pub use self::metrics::{install_recorder, metrics_router};
