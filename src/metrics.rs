//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for verb serving, row retrieval,
//! and destination application.
//!
//! All metrics are prefixed with `rowsync_` and follow Prometheus
//! conventions: counters end in `_total`, histograms track distributions.

use metrics::{counter, histogram};

/// Record a verb served by the source protocol engine.
pub fn record_command(verb: &str) {
    counter!("rowsync_commands_total", "verb" => verb.to_string()).increment(1);
}

/// Record rows hashed while answering a HASH verb.
pub fn record_rows_hashed(table: &str, count: usize) {
    counter!("rowsync_rows_hashed_total", "table" => table.to_string()).increment(count as u64);
}

/// Record rows streamed out while answering a ROWS verb.
pub fn record_rows_sent(table: &str, count: usize) {
    counter!("rowsync_rows_sent_total", "table" => table.to_string()).increment(count as u64);
}

/// Record rows processed by the applier for one range (incoming plus
/// deleted).
pub fn record_rows_applied(table: &str, count: u64) {
    counter!("rowsync_rows_applied_total", "table" => table.to_string()).increment(count);
}

/// Record an insert batch flush and its statement size.
pub fn record_insert_flush(table: &str, statement_bytes: usize) {
    counter!("rowsync_insert_flushes_total", "table" => table.to_string()).increment(1);
    histogram!("rowsync_insert_statement_bytes", "table" => table.to_string())
        .record(statement_bytes as f64);
}
