use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramTimer, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::time::Instant;

use crate::{BackendError, Result};

lazy_static! {
    // Inbound API metrics
    pub static ref HTTP_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of API requests received",
        &["endpoint"]
    ).expect("http_requests_total registers once");

    pub static ref HTTP_REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "API request duration in seconds",
        &["endpoint"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]
    ).expect("http_request_duration_seconds registers once");

    // Kibana / Elasticsearch calls
    pub static ref UPSTREAM_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "upstream_requests_total",
        "Total number of Kibana and Elasticsearch calls by outcome",
        &["target", "outcome"]
    ).expect("upstream_requests_total registers once");

    pub static ref UPSTREAM_DURATION: HistogramVec = register_histogram_vec!(
        "upstream_request_duration_seconds",
        "Kibana and Elasticsearch call duration in seconds",
        &["target"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).expect("upstream_request_duration_seconds registers once");
}

/// Counts a request on creation and records its duration when dropped.
pub struct RequestTimer {
    endpoint: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn new(endpoint: &'static str) -> Self {
        HTTP_REQUESTS.with_label_values(&[endpoint]).inc();
        Self {
            endpoint,
            start: Instant::now(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        HTTP_REQUEST_DURATION
            .with_label_values(&[self.endpoint])
            .observe(duration);
    }
}

pub fn start_upstream_timer(target: &str) -> HistogramTimer {
    UPSTREAM_DURATION.with_label_values(&[target]).start_timer()
}

pub fn record_upstream(target: &str, outcome: &str) {
    UPSTREAM_REQUESTS.with_label_values(&[target, outcome]).inc();
}

/// Renders every registered metric in the Prometheus text format.
pub fn render() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| BackendError::Internal(format!("Failed to encode metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| BackendError::Internal(format!("Metrics are not valid UTF-8: {}", e)))
}
