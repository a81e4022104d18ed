//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (scope, address, nonce) on every nonce event
//! - Metrics are cheap (atomic increments); recording without an installed
//!   recorder is a no-op, so tests need no setup

pub mod logging;
pub mod metrics;
