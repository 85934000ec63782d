//! Metrics and logging for the HTLC swap engine
//!
//! Prometheus counters, gauges and histograms for swap progress and ledger
//! retries, plus the `tracing` subscriber setup and per-swap spans.
//!
//! # Example
//!
//! ```no_run
//! use fusion_htlc_metrics::{init_tracing, MetricsCollector};
//!
//! init_tracing("info,fusion_htlc=debug", false).unwrap();
//!
//! let collector = MetricsCollector::new();
//! collector.record_swap_started();
//! println!("{}", collector.gather_text().unwrap());
//! ```

pub mod collector;
pub mod metrics;
pub mod tracing;

pub use collector::{MetricsCollector, MetricsError};
pub use crate::tracing::{
    init_tracing, CorrelationId, ErrorContext, MetricsLayer, SwapSpan, TracingError,
};
