//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Interceptor and server produce:
//!     → logging.rs (structured log events, request span per request)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through every log line of a request via its span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
