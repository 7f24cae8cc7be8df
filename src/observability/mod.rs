//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! listeners, sessions, HTTP proxy produce:
//!     → logging.rs (structured tracing events, pretty or JSON)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (log aggregation)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Events carry fields (listener, session_id, direction) rather than prose
//! - Metrics are cheap (atomic increments) and always recorded; the
//!   exporter is only installed when an address is configured

pub mod logging;
pub mod metrics;
