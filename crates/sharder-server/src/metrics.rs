//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `sharder_requests_total` - counter of routed requests by outcome
//! - `sharder_request_duration_seconds` - histogram of end-to-end proxy time
//! - `sharder_members` - gauge of nodes on the ring
//! - `sharder_membership_changes_total` - counter of nodes added/removed
//! - `sharder_discovery_failures_total` - counter of failed refreshes

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// State containing the Prometheus handle for metrics export
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and describe every metric.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    describe_counter!("sharder_requests_total", "Total requests routed, by outcome");
    describe_histogram!(
        "sharder_request_duration_seconds",
        "Duration of proxied requests in seconds"
    );
    describe_gauge!("sharder_members", "Number of backend nodes on the hash ring");
    describe_counter!(
        "sharder_membership_changes_total",
        "Total backend nodes added to or removed from the ring"
    );
    describe_counter!(
        "sharder_discovery_failures_total",
        "Total failed backend discovery refreshes"
    );
}

/// How a routed request ended.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Forwarded,
    Unavailable,
    UpstreamError,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Forwarded => "forwarded",
            Outcome::Unavailable => "unavailable",
            Outcome::UpstreamError => "upstream_error",
        }
    }
}

pub fn record_request(outcome: Outcome, duration: Duration) {
    counter!("sharder_requests_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("sharder_request_duration_seconds").record(duration.as_secs_f64());
}

pub fn set_member_count(count: usize) {
    gauge!("sharder_members").set(count as f64);
}

pub fn record_membership_change(added: usize, removed: usize) {
    counter!("sharder_membership_changes_total", "change" => "added").increment(added as u64);
    counter!("sharder_membership_changes_total", "change" => "removed").increment(removed as u64);
}

pub fn record_discovery_failure() {
    counter!("sharder_discovery_failures_total").increment(1);
}
