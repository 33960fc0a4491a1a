//! Monitoring Module
//!
//! Observability for the router:
//! - Structured logging via `tracing`
//! - Router counters with Prometheus export

pub mod logging;
pub mod metrics;

pub use logging::{init_tracing, LogFormat, LogLevel, LoggingConfig};
pub use metrics::{Counter, MetricsSnapshot, RouterMetrics};
