//! Per-request metrics keyed by the matched route template

use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use docchat_common::metrics::{RequestMetrics, METRICS_PREFIX};

/// Record count, latency and in-flight requests for every route
pub async fn track_metrics(request: Request, next: Next) -> Response {
    // Route templates keep label cardinality bounded
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let tracker = RequestMetrics::start(request.method().as_str(), &endpoint);

    let in_flight = metrics::gauge!(format!("{}_requests_in_flight", METRICS_PREFIX));
    in_flight.increment(1.0);
    let response = next.run(request).await;
    in_flight.decrement(1.0);

    tracker.finish(response.status().as_u16());
    response
}
