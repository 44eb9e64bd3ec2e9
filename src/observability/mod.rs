//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Endpoints and the coordinator produce:
//!     → logging.rs (tracing subscriber for direct structured events)
//!     → publisher.rs (queued entries: bind failures, handler faults,
//!                     lifecycle milestones; drained at shutdown)
//!     → metrics.rs (counters and gauges)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON optional) for machine parsing
//! - The publisher is the dependent subsystem the coordinator shuts down with
//!   a bound; it never blocks process exit
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
pub mod publisher;

pub use publisher::{LogEntry, LogLevel, LogPublisher, LogSink, PublisherShutdown, TracingSink};
