//! Metric names and recording helpers.
//!
//! Uses the `metrics` facade; the binary installs the Prometheus exporter.
//! Keeping the names in one place means the engine and the sync worker
//! cannot drift apart from the dashboard queries.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

pub const CONSUME_TOTAL: &str = "limit_consume_total";
pub const CONSUME_LATENCY_MS: &str = "limit_consume_latency_ms";
pub const DIRTY_KEYS: &str = "dirty_keys";
pub const SYNC_RECORDS_TOTAL: &str = "sync_records_synced_total";
pub const SYNC_FAILURES_TOTAL: &str = "sync_failures_total";

/// Registers help texts with the installed recorder. Call once at startup.
pub fn describe() {
    describe_counter!(
        CONSUME_TOTAL,
        "Consume calls by serving tier and outcome (success / denied / error)"
    );
    describe_histogram!(CONSUME_LATENCY_MS, "End-to-end consume latency in milliseconds");
    describe_gauge!(DIRTY_KEYS, "Fast-store keys awaiting write-back");
    describe_counter!(SYNC_RECORDS_TOTAL, "Rows written back to the record store");
    describe_counter!(SYNC_FAILURES_TOTAL, "Sync ticks that wrote nothing back");
}

/// Records one finished consume call.
pub fn consume_observed(source: &'static str, outcome: &'static str, latency: Duration) {
    counter!(CONSUME_TOTAL, "source" => source, "outcome" => outcome).increment(1);
    histogram!(CONSUME_LATENCY_MS).record(latency.as_secs_f64() * 1_000.0);
}

/// Records the result of one sync tick and the dirty-set level after it.
pub fn sync_outcome(records_written: u64, dirty_len: usize) {
    counter!(SYNC_RECORDS_TOTAL).increment(records_written);
    #[allow(clippy::cast_precision_loss)]
    gauge!(DIRTY_KEYS).set(dirty_len as f64);
}

/// Records a tick that failed outright.
pub fn sync_failure() {
    counter!(SYNC_FAILURES_TOTAL).increment(1);
}
