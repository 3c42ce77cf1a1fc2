//! Metrics and observability utilities
//!
//! Prometheus metrics with standardized naming. Every helper is a thin
//! wrapper over the `metrics` facade, so they are no-ops until an exporter
//! is installed.

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all DocChat metrics
pub const METRICS_PREFIX: &str = "docchat";

/// Histogram buckets for HTTP request latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Buckets for chat turns and index builds (LLM-bound, much slower)
pub const TURN_BUCKETS: &[f64] = &[
    0.250, 0.500, 1.000, 2.000, 5.000, 10.00, 20.00, 30.00, 60.00, 120.0,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_chat_turns_total", METRICS_PREFIX),
        Unit::Count,
        "Chat turns by engine mode and outcome"
    );

    describe_histogram!(
        format!("{}_chat_turn_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end chat turn latency"
    );

    describe_counter!(
        format!("{}_sub_questions_total", METRICS_PREFIX),
        Unit::Count,
        "Sub-questions produced by decomposition, by outcome"
    );

    describe_counter!(
        format!("{}_index_builds_total", METRICS_PREFIX),
        Unit::Count,
        "Index resolutions by outcome (loaded or rebuilt)"
    );

    describe_histogram!(
        format!("{}_index_build_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Index load or rebuild latency"
    );

    describe_counter!(
        format!("{}_documents_fetched_total", METRICS_PREFIX),
        Unit::Count,
        "Documents fetched and parsed"
    );

    describe_counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        Unit::Count,
        "Vector retrievals"
    );

    describe_counter!(
        format!("{}_embedding_texts_total", METRICS_PREFIX),
        Unit::Count,
        "Texts embedded"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding batch latency in seconds"
    );

    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record a finished chat turn
pub fn record_chat_turn(mode: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_chat_turns_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "status" => status
    )
    .increment(1);

    histogram!(
        format!("{}_chat_turn_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);
}

/// Record sub-question outcomes of one planner run
pub fn record_sub_questions(answered: usize, dropped: usize) {
    counter!(
        format!("{}_sub_questions_total", METRICS_PREFIX),
        "status" => "answered"
    )
    .increment(answered as u64);

    counter!(
        format!("{}_sub_questions_total", METRICS_PREFIX),
        "status" => "dropped"
    )
    .increment(dropped as u64);
}

/// Record an index resolution; `outcome` is `loaded` or `rebuilt`
pub fn record_index_build(layout: &str, outcome: &str, documents: usize, duration_secs: f64) {
    counter!(
        format!("{}_index_builds_total", METRICS_PREFIX),
        "layout" => layout.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(documents.max(1) as u64);

    histogram!(
        format!("{}_index_build_duration_seconds", METRICS_PREFIX),
        "layout" => layout.to_string(),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// Record a document fetch
pub fn record_fetch(success: bool, nodes: usize) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_documents_fetched_total", METRICS_PREFIX),
        "status" => status
    )
    .increment(1);

    if success {
        counter!(format!("{}_nodes_created_total", METRICS_PREFIX)).increment(nodes as u64);
    }
}

/// Record a retrieval and whether it came back empty
pub fn record_retrieval(results: usize) {
    let outcome = if results == 0 { "empty" } else { "hit" };
    counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record an embedding batch
pub fn record_embedding(texts: usize, duration_secs: f64) {
    counter!(format!("{}_embedding_texts_total", METRICS_PREFIX)).increment(texts as u64);
    histogram!(format!("{}_embedding_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record cache metrics
pub fn record_cache(cache_name: &str, hit: bool) {
    let name = if hit { "cache_hits_total" } else { "cache_misses_total" };
    counter!(
        format!("{}_{}", METRICS_PREFIX, name),
        "cache" => cache_name.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buckets_sorted() {
        for buckets in [LATENCY_BUCKETS, TURN_BUCKETS] {
            assert!(buckets.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_helpers_without_exporter() {
        RequestMetrics::start("POST", "/v1/conversations/{id}/messages").finish(200);
        record_chat_turn("full", true, 1.5);
        record_sub_questions(2, 1);
        record_cache("storage_context", false);
    }
}
