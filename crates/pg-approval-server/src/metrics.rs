use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};
use std::sync::LazyLock;

pub static CALLBACKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pg_approval_callbacks_total",
        "Authorization callbacks received",
        &["flow"]
    )
    .unwrap()
});

pub static MALFORMED_CALLBACKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pg_approval_malformed_callbacks_total",
        "Callbacks rejected before processing",
        &["flow"]
    )
    .unwrap()
});

pub static OUTCOMES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pg_approval_outcomes_total",
        "Results returned to callers",
        &["flow", "status"]
    )
    .unwrap()
});

pub static REPLAYS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pg_approval_replays_total",
        "Duplicate deliveries answered from the ledger",
        &["flow"]
    )
    .unwrap()
});

pub static COMPENSATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "pg_approval_compensations_total",
        "Network cancels issued",
        &["result"]
    )
    .unwrap()
});

pub static SAGA_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "pg_approval_saga_duration_seconds",
        "Callback processing latency in seconds",
        &["status"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]
    )
    .unwrap()
});

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
