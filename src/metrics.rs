//! Metrics surface: Prometheus text exposition plus a JSON snapshot
//! endpoint for a single course.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};

use crate::db::{self, DbPool};
use crate::queue::IntakeQueue;
use std::sync::Arc;

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_counter!(
            "enrollment_requests_total",
            "Total enrollment requests by status (queued, error)"
        );
        metrics::describe_histogram!(
            "intake_latency_seconds",
            "Latency of the intake endpoint, from request receipt to queued receipt"
        );
        metrics::describe_gauge!("queue_depth", "Intake queue depth for a course");
        metrics::describe_gauge!("seats_taken", "Seats currently taken for a course");
        metrics::describe_gauge!("course_capacity", "Capacity for a course");

        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// `GET /metrics` - Prometheus text exposition, gated by `ENABLE_METRICS`.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (StatusCode::OK, handle.render())
}

#[derive(Debug, Deserialize)]
pub struct MetricsJsonQuery {
    pub course_id: i64,
}

#[derive(Debug, Serialize)]
pub struct MetricsJsonResponse {
    course_id: i64,
    queue_depth: u64,
    seats_taken: i32,
    capacity: i32,
    status: String,
}

/// `GET /metrics/json?course_id=` - a JSON snapshot for a single course,
/// combining the live queue depth with the durable seat counters.
pub async fn metrics_json(
    State(pool): State<DbPool>,
    State(queue): State<Arc<dyn IntakeQueue>>,
    Query(params): Query<MetricsJsonQuery>,
) -> Result<Json<MetricsJsonResponse>, StatusCode> {
    let course = db::get_course(&pool, params.course_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let queue_depth = queue
        .cardinality(params.course_id)
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    metrics::gauge!("queue_depth").set(queue_depth as f64);
    metrics::gauge!("seats_taken").set(course.seats_taken as f64);
    metrics::gauge!("course_capacity").set(course.capacity as f64);

    Ok(Json(MetricsJsonResponse {
        course_id: course.id,
        queue_depth,
        seats_taken: course.seats_taken,
        capacity: course.capacity,
        status: if course.seats_taken >= course.capacity {
            "full".to_string()
        } else {
            "open".to_string()
        },
    }))
}
