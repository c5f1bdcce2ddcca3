use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Logs each request's method/path/status/latency and records the
/// `intake_latency_seconds` histogram.
pub async fn log_requests_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = status.as_u16(),
        latency_ms = duration.as_millis(),
        "Handled request"
    );

    metrics::histogram!("intake_latency_seconds").record(duration.as_secs_f64());

    response
}
