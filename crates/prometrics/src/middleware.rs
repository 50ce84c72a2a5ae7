use std::{sync::Arc, time::Instant};

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::debug;

use crate::router::MetricsState;

/// Counts the request as started before delegating and as done once control
/// returns, via a drop guard so completion also lands on panic or
/// cancellation.
pub async fn track_concurrency(
    State(state): State<Arc<MetricsState>>,
    request: Request,
    next: Next,
) -> Response {
    state.http.request_started();
    let _done = state.http.completion_guard();

    next.run(request).await
}

/// Observes wall-clock request duration labeled by final status code, method,
/// and the matched route pattern. A request with no retrievable pattern gets
/// an empty route label.
pub async fn track_duration(
    State(state): State<Arc<MetricsState>>,
    request: Request,
    next: Next,
) -> Response {
    let started_at = Instant::now();
    let method = request.method().as_str().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_default();

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let elapsed = started_at.elapsed();
    state.http.observe_request(&method, status, &route, elapsed);
    debug!(
        method = %method,
        route = %route,
        status = status,
        elapsed_ms = elapsed.as_millis() as u64,
        "request observed"
    );

    response
}
