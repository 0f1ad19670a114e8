//! Dispatch metrics
//!
//! OpenTelemetry instruments recorded by the pipeline when an endpoint is
//! built with metrics enabled, and by [`crate::filter::MetricsFilter`].
//!
//! # Metrics Collected
//!
//! - **rpcflow.requests.total**: calls dispatched, by method and outcome (counter)
//! - **rpcflow.request.duration**: call latency in seconds (histogram)
//! - **rpcflow.batch.size**: elements per batch, by mode (histogram)
//! - **rpcflow.errors.total**: error responses, by JSON-RPC code (counter)
//! - **rpcflow.authorization.denied**: calls refused by authorization (counter)
//!
//! # Examples
//!
//! ```rust,no_run
//! use rpcflow_server::DispatchMetrics;
//!
//! let metrics = DispatchMetrics::new("my-service");
//! metrics.record_request("add", "success", 0.002);
//! metrics.record_error(-32601);
//! ```

use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    InstrumentationScope, KeyValue,
};

/// Instruments for request dispatch
pub struct DispatchMetrics {
    /// Calls dispatched
    pub requests_total: Counter<u64>,
    /// Call latency in seconds
    pub request_duration: Histogram<f64>,
    /// Batch size distribution
    pub batch_size: Histogram<u64>,
    /// Error responses
    pub errors_total: Counter<u64>,
    /// Authorization denials
    pub authorization_denied: Counter<u64>,
}

impl DispatchMetrics {
    /// Instruments on the global meter provider, scoped to `service_name`
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    /// Instruments on a caller-supplied meter
    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            requests_total: meter
                .u64_counter("rpcflow.requests.total")
                .with_description("Total number of calls dispatched")
                .build(),
            request_duration: meter
                .f64_histogram("rpcflow.request.duration")
                .with_description("Call processing duration in seconds")
                .build(),
            batch_size: meter
                .u64_histogram("rpcflow.batch.size")
                .with_description("Number of elements in batch requests")
                .build(),
            errors_total: meter
                .u64_counter("rpcflow.errors.total")
                .with_description("Total number of error responses")
                .build(),
            authorization_denied: meter
                .u64_counter("rpcflow.authorization.denied")
                .with_description("Total number of calls refused by authorization")
                .build(),
        }
    }

    /// Records one finished call
    pub fn record_request(&self, method: &str, outcome: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("method", method.to_string()),
            KeyValue::new("outcome", outcome.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    /// Records a batch
    pub fn record_batch(&self, size: u64, mode: &str) {
        let attributes = &[KeyValue::new("mode", mode.to_string())];
        self.batch_size.record(size, attributes);
    }

    /// Records an error response
    pub fn record_error(&self, code: i32) {
        let attributes = &[KeyValue::new("code", i64::from(code))];
        self.errors_total.add(1, attributes);
    }

    /// Records an authorization denial
    pub fn record_denied(&self, method: &str) {
        let attributes = &[KeyValue::new("method", method.to_string())];
        self.authorization_denied.add(1, attributes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = DispatchMetrics::new("test-dispatch");

        // No exporter installed; recording must be a no-op
        metrics.record_request("add", "success", 0.1);
        metrics.record_batch(10, "parallel");
        metrics.record_error(-32601);
        metrics.record_denied("secret");
    }

    #[test]
    fn test_batch_metrics() {
        let metrics = DispatchMetrics::new("test-dispatch-batch");

        metrics.record_batch(5, "parallel");
        metrics.record_batch(10, "sequential");
        metrics.record_batch(1, "parallel");
    }
}
