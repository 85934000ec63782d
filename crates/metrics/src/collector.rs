use std::time::Duration;

use fusion_htlc_types::SwapStatus;
use prometheus::{Encoder, TextEncoder};

use crate::metrics::*;

/// Records swap and ledger metrics into the process-wide prometheus registry
#[derive(Debug, Clone)]
pub struct MetricsCollector {
    enabled: bool,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self { enabled: true }
    }

    /// Collector that records nothing
    pub fn disabled() -> Self {
        Self { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SWAP METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record a swap entering execution
    pub fn record_swap_started(&self) {
        if !self.enabled {
            return;
        }
        SWAPS_STARTED.inc();
        ACTIVE_SWAPS.inc();
    }

    /// Record a status change.
    ///
    /// Terminal targets also update the completed, failed or cancelled
    /// counters and release the active gauge.
    pub fn record_transition(&self, from: SwapStatus, to: SwapStatus) {
        if !self.enabled {
            return;
        }
        STATUS_TRANSITIONS
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();

        match to {
            SwapStatus::Completed => SWAPS_COMPLETED.inc(),
            SwapStatus::Failed(kind) => SWAPS_FAILED.with_label_values(&[kind.as_str()]).inc(),
            SwapStatus::Cancelled => SWAPS_CANCELLED.inc(),
            _ => return,
        }
        ACTIVE_SWAPS.dec();
    }

    pub fn record_duration(&self, duration: Duration) {
        if self.enabled {
            SWAP_DURATION.observe(duration.as_millis() as f64);
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Record one retried ledger call
    pub fn record_retry(&self, operation: &str) {
        if self.enabled {
            LEDGER_RETRIES.with_label_values(&[operation]).inc();
        }
    }

    /// Record a ledger call that failed for good
    pub fn record_ledger_failure(&self, operation: &str) {
        if self.enabled {
            LEDGER_FAILURES.with_label_values(&[operation]).inc();
        }
    }

    pub(crate) fn record_log_event(&self, level: &str) {
        LOG_EVENTS.with_label_values(&[level]).inc();
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPORT
    // ═══════════════════════════════════════════════════════════════════════════

    /// Export metrics in Prometheus text format
    pub fn gather_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::EncodingError(e.to_string()))?;

        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingError(e.to_string()))
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics error types
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("encoding error: {0}")]
    EncodingError(String),
}
