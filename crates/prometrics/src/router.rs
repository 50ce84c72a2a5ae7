use std::sync::Arc;

use axum::{Router, middleware, routing::get};

use crate::collectors::http::HttpMetrics;
use crate::error::Result;
use crate::handlers::prometheus_metrics;
use crate::middleware::{track_concurrency, track_duration};
use crate::registry::MetricsRegistry;

/// One registry plus its request collectors. Explicitly constructed and
/// passed; independent instances can coexist.
pub struct MetricsState {
    pub registry: Arc<MetricsRegistry>,
    pub http: Arc<HttpMetrics>,
}

impl MetricsState {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(MetricsRegistry::new());
        let http = Arc::new(HttpMetrics::register(&registry)?);

        Ok(Self { registry, http })
    }
}

/// Attaches the scrape route and both instrumentation layers to the host's
/// routes. Concurrency accounting wraps duration tracking, so per request
/// the order is start, duration start, handler, duration record, done. The
/// scrape route sits inside the chain and is counted like any other request.
pub fn instrument_router(routes: Router<Arc<MetricsState>>, state: Arc<MetricsState>) -> Router {
    routes
        .route("/metrics", get(prometheus_metrics))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_duration,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            track_concurrency,
        ))
        .with_state(state)
}
