//! Request metrics recorded around every route.

use std::time::Instant;

use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, histogram};

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";

const SLOW_REQUEST_SECS: f64 = 1.0;

/// Counts and times each request, labelled by route template rather than raw
/// path so order ids do not explode label cardinality.
pub async fn track_http_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let labels = [
        ("endpoint", endpoint.clone()),
        ("method", method.clone()),
        ("status_class", status_class(response.status()).to_string()),
    ];
    histogram!(HTTP_REQUEST_DURATION, &labels).record(duration);
    counter!(HTTP_REQUESTS_TOTAL, &labels).increment(1);

    if duration > SLOW_REQUEST_SECS {
        tracing::warn!(
            endpoint = %endpoint,
            method = %method,
            status = response.status().as_u16(),
            duration_secs = duration,
            "Slow request"
        );
    }

    response
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
