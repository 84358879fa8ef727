//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `sharder_reconcile_ticks_total` - counter of polling ticks by result
//! - `sharder_reconcile_errors_total` - counter of per-resource reconcile failures
//! - `sharder_reconcile_writes_total` - counter of cluster writes by kind and op

use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and describe every metric.
pub fn init_metrics() -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(
        "sharder_reconcile_ticks_total",
        "Total reconcile ticks, by result"
    );
    describe_counter!(
        "sharder_reconcile_errors_total",
        "Total Sharded resources that failed to reconcile"
    );
    describe_counter!(
        "sharder_reconcile_writes_total",
        "Total Deployment and Service writes issued"
    );

    Ok(handle)
}

pub fn record_tick(ok: bool) {
    let result = if ok { "ok" } else { "list_failed" };
    counter!("sharder_reconcile_ticks_total", "result" => result).increment(1);
}

pub fn record_reconcile_error() {
    counter!("sharder_reconcile_errors_total").increment(1);
}

pub fn record_write(kind: &'static str, op: &'static str) {
    counter!("sharder_reconcile_writes_total", "kind" => kind, "op" => op).increment(1);
}
