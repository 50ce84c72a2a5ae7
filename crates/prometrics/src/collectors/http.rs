use std::{sync::Arc, time::Duration};

use crate::error::Result;
use crate::registry::{Counter, HistogramVec, MetricsRegistry};

/// Default duration bounds for HTTP latency, from sub-10ms up to 10s.
pub const DEFAULT_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Start/done counters plus the duration histogram partitioned by status
/// code, method, and matched route pattern.
pub struct HttpMetrics {
    request_start: Arc<Counter>,
    request_done: Arc<Counter>,
    request_duration_seconds: Arc<HistogramVec>,
}

impl HttpMetrics {
    pub fn register(registry: &MetricsRegistry) -> Result<Self> {
        Ok(Self {
            request_start: registry
                .register_counter("request_start", "Number of requests received")?,
            request_done: registry
                .register_counter("request_done", "Number of requests completed")?,
            request_duration_seconds: registry.register_histogram(
                "request_duration_seconds",
                "Duration of requests by code, method, and route",
                &["code", "method", "route"],
                DEFAULT_DURATION_BUCKETS,
            )?,
        })
    }

    pub fn request_started(&self) {
        self.request_start.inc();
    }

    /// Arms completion accounting for one request. The guard counts the
    /// request as done when dropped, including when the downstream handler
    /// panics or the request future is cancelled.
    pub fn completion_guard(&self) -> CompletionGuard {
        CompletionGuard {
            counter: Arc::clone(&self.request_done),
        }
    }

    pub fn observe_request(&self, method: &str, status: u16, route: &str, elapsed: Duration) {
        let code = status.to_string();
        self.request_duration_seconds
            .observe(&[&code, method, route], elapsed.as_secs_f64());
    }
}

pub struct CompletionGuard {
    counter: Arc<Counter>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.counter.inc();
    }
}
