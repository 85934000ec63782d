use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

lazy_static! {
    // ═══════════════════════════════════════════════════════════════════════════
    // SWAP METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Total number of swaps the orchestrator started executing
    pub static ref SWAPS_STARTED: IntCounter = register_int_counter!(
        "fusion_htlc_swaps_started_total",
        "Total number of swaps started"
    )
    .unwrap();

    /// Total number of swaps that reached Completed
    pub static ref SWAPS_COMPLETED: IntCounter = register_int_counter!(
        "fusion_htlc_swaps_completed_total",
        "Total number of swaps completed"
    )
    .unwrap();

    /// Failed swaps by failure kind
    pub static ref SWAPS_FAILED: IntCounterVec = register_int_counter_vec!(
        "fusion_htlc_swaps_failed_total",
        "Total number of swaps that failed, by failure kind",
        &["kind"]
    )
    .unwrap();

    pub static ref SWAPS_CANCELLED: IntCounter = register_int_counter!(
        "fusion_htlc_swaps_cancelled_total",
        "Total number of swaps cancelled"
    )
    .unwrap();

    /// Swaps started but not yet terminal
    pub static ref ACTIVE_SWAPS: IntGauge = register_int_gauge!(
        "fusion_htlc_swaps_active",
        "Current number of active swaps"
    )
    .unwrap();

    /// Status transitions by source and target status
    pub static ref STATUS_TRANSITIONS: IntCounterVec = register_int_counter_vec!(
        "fusion_htlc_status_transitions_total",
        "Total swap status transitions",
        &["from", "to"]
    )
    .unwrap();

    /// Swap duration from start to terminal status
    pub static ref SWAP_DURATION: Histogram = register_histogram!(
        "fusion_htlc_swap_duration_ms",
        "Swap duration in milliseconds",
        vec![100.0, 500.0, 1000.0, 5000.0, 10000.0, 30000.0, 60000.0, 300000.0]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // LEDGER METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Ledger calls retried, by operation
    pub static ref LEDGER_RETRIES: IntCounterVec = register_int_counter_vec!(
        "fusion_htlc_ledger_retries_total",
        "Total ledger call retries by operation",
        &["operation"]
    )
    .unwrap();

    /// Ledger calls that gave up, by operation
    pub static ref LEDGER_FAILURES: IntCounterVec = register_int_counter_vec!(
        "fusion_htlc_ledger_failures_total",
        "Total ledger calls that failed after retries, by operation",
        &["operation"]
    )
    .unwrap();

    // ═══════════════════════════════════════════════════════════════════════════
    // LOG METRICS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Warn and error events seen by the tracing layer
    pub static ref LOG_EVENTS: IntCounterVec = register_int_counter_vec!(
        "fusion_htlc_log_events_total",
        "Total warn and error log events by level",
        &["level"]
    )
    .unwrap();
}
