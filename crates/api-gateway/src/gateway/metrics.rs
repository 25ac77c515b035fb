//! Gateway-wide counters.
//!
//! Route-level detail lives in `RouteStats`; these are the totals exposed by
//! the admin `/metrics` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

/// Gateway metrics
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    // Request counters
    pub requests_total: AtomicU64,
    pub requests_success: AtomicU64,
    pub requests_error: AtomicU64,
    pub not_found: AtomicU64,

    // Admission counters
    pub rate_limit_rejected: AtomicU64,
    pub circuit_rejected: AtomicU64,

    // Backend outcomes
    pub timeouts: AtomicU64,
    pub bad_gateway: AtomicU64,

    /// Requests currently being forwarded
    pub in_flight: AtomicU64,

    // Latency tracking (simplified - in production use histograms)
    pub total_latency_ms: AtomicU64,
    pub request_count_for_latency: AtomicU64,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a forwarded request's outcome
    pub fn record_request(&self, success: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        if success {
            self.requests_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_error.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.request_count_for_latency
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_not_found(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_rejection(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.rate_limit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.circuit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bad_gateway(&self) {
        self.bad_gateway.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forward_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn forward_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> f64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.request_count_for_latency.load(Ordering::Relaxed);
        if count == 0 {
            0.0
        } else {
            total as f64 / count as f64
        }
    }

    /// Export metrics in Prometheus text format
    #[cfg(feature = "metrics")]
    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &str, &str, &AtomicU64); 10] = [
            ("gateway_requests_total", "counter", "Total number of gateway requests", &self.requests_total),
            ("gateway_requests_success_total", "counter", "Requests answered 2xx by the backend", &self.requests_success),
            ("gateway_requests_error_total", "counter", "Forwarded requests that failed", &self.requests_error),
            ("gateway_not_found_total", "counter", "Requests with no matching route", &self.not_found),
            ("gateway_rate_limit_rejected_total", "counter", "Requests rejected by a route limiter", &self.rate_limit_rejected),
            ("gateway_circuit_rejected_total", "counter", "Requests rejected by an open circuit", &self.circuit_rejected),
            ("gateway_timeouts_total", "counter", "Forwards that exceeded the route deadline", &self.timeouts),
            ("gateway_bad_gateway_total", "counter", "Backend transport failures", &self.bad_gateway),
            ("gateway_in_flight", "gauge", "Requests currently being forwarded", &self.in_flight),
            ("gateway_latency_ms_sum", "counter", "Sum of forward latencies", &self.total_latency_ms),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "# HELP gateway_average_latency_ms Average forward latency\n\
             # TYPE gateway_average_latency_ms gauge\n\
             gateway_average_latency_ms {:.2}\n",
            self.average_latency_ms()
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests": {
                "total": self.requests_total.load(Ordering::Relaxed),
                "success": self.requests_success.load(Ordering::Relaxed),
                "error": self.requests_error.load(Ordering::Relaxed),
                "not_found": self.not_found.load(Ordering::Relaxed),
                "in_flight": self.in_flight.load(Ordering::Relaxed),
            },
            "admission": {
                "rate_limited": self.rate_limit_rejected.load(Ordering::Relaxed),
                "circuit_rejected": self.circuit_rejected.load(Ordering::Relaxed),
            },
            "backend": {
                "timeouts": self.timeouts.load(Ordering::Relaxed),
                "bad_gateway": self.bad_gateway.load(Ordering::Relaxed),
            },
            "latency": {
                "average_ms": self.average_latency_ms(),
            }
        })
    }
}
