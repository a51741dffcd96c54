//! Streaming telemetry for observability.
//!
//! Lock-free atomic counters record what the router, pipeline and scheduler
//! did, with minimal overhead on the submit and tick paths.
//!
//! # Architecture
//!
//! ```text
//! Router / Pipeline / Scheduler ─────► StreamMetrics ─────► StreamSnapshot ─────► Views
//!                                      (atomic counters)   (point-in-time copy)   (CLI, logs)
//! ```
//!
//! # Example
//!
//! ```
//! use texstream::telemetry::StreamMetrics;
//!
//! let metrics = StreamMetrics::new();
//! metrics.request_admitted();
//! metrics.packets_sent(12);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.requests_admitted, 1);
//! assert_eq!(snapshot.packets_sent, 12);
//! ```

mod metrics;
mod snapshot;

pub use metrics::StreamMetrics;
pub use snapshot::StreamSnapshot;
