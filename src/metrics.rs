// Prometheus metrics definitions for the match backend.

use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Counters ─────────────────────────────────────────────────────

    /// Matches created (reused pending matches are not counted).
    pub static ref MATCHES_CREATED_TOTAL: IntCounter =
        IntCounter::new("itt_matches_created_total", "Matches created").unwrap();

    /// Join attempts by outcome: joined, rejoined, already_accepted, rejected.
    pub static ref MATCH_JOINS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("itt_match_joins_total", "Match join attempts"),
        &["outcome"],
    )
    .unwrap();

    /// Matches that reached the completed state.
    pub static ref MATCHES_COMPLETED_TOTAL: IntCounter =
        IntCounter::new("itt_matches_completed_total", "Matches completed").unwrap();

    /// Matches moved to expired, lazily or by the sweep.
    pub static ref MATCHES_EXPIRED_TOTAL: IntCounter =
        IntCounter::new("itt_matches_expired_total", "Matches expired").unwrap();

    /// Total API requests, by method/endpoint/status.
    pub static ref API_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("itt_api_requests_total", "Total API requests"),
        &["method", "endpoint", "status"],
    )
    .unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// API request duration in seconds, by endpoint.
    pub static ref API_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "itt_api_request_duration_seconds",
            "API request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]),
        &["endpoint"],
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(MATCHES_CREATED_TOTAL.clone()),
        Box::new(MATCH_JOINS_TOTAL.clone()),
        Box::new(MATCHES_COMPLETED_TOTAL.clone()),
        Box::new(MATCHES_EXPIRED_TOTAL.clone()),
        Box::new(API_REQUESTS_TOTAL.clone()),
        Box::new(API_REQUEST_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Metric registration skipped: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Normalize a URL path for metric labels: ids and match codes become `:id`
/// to prevent cardinality explosion.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<i64>().is_ok()
                || uuid::Uuid::parse_str(segment).is_ok()
                || crate::matches::code::looks_like_code(&segment.to_ascii_uppercase())
            {
                ":id"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Middleware recording request count and latency per normalized endpoint.
pub async fn track_requests(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let endpoint = normalize_path(req.uri().path());
    let start = Instant::now();

    let response = next.run(req).await;

    API_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint.as_str()])
        .observe(start.elapsed().as_secs_f64());
    API_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), endpoint.as_str(), response.status().as_str()])
        .inc();
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_no_ids() {
        assert_eq!(normalize_path("/api/matches"), "/api/matches");
        assert_eq!(normalize_path("/api/matches/history"), "/api/matches/history");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_normalize_path_with_ids() {
        assert_eq!(
            normalize_path("/api/matches/6f1c2d3e-1111-4a4b-9c9d-0123456789ab/link"),
            "/api/matches/:id/link"
        );
        assert_eq!(normalize_path("/api/matches/ABCD2345/join"), "/api/matches/:id/join");
        assert_eq!(normalize_path("/api/matches/abcd2345"), "/api/matches/:id");
        assert_eq!(normalize_path("/api/sessions/42"), "/api/sessions/:id");
    }

    #[test]
    fn test_gather_metrics_returns_string() {
        register_metrics();
        // Registering twice must not panic.
        register_metrics();
        let output = gather_metrics();
        assert!(output.is_empty() || output.contains("itt_"));
    }

    #[test]
    fn test_metric_increments() {
        let before = MATCHES_CREATED_TOTAL.get();
        MATCHES_CREATED_TOTAL.inc();
        assert!(MATCHES_CREATED_TOTAL.get() > before);

        MATCH_JOINS_TOTAL.with_label_values(&["joined"]).inc();
        MATCH_JOINS_TOTAL.with_label_values(&["already_accepted"]).inc();
        MATCHES_COMPLETED_TOTAL.inc();
        MATCHES_EXPIRED_TOTAL.inc();

        API_REQUEST_DURATION_SECONDS
            .with_label_values(&["/api/matches"])
            .observe(0.05);
        API_REQUESTS_TOTAL
            .with_label_values(&["GET", "/api/matches", "200"])
            .inc();
    }
}
