//! Liveness and readiness probes. Liveness never depends on downstream;
//! readiness checks the queue service and the database.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::db::{self, DbPool};
use crate::queue::IntakeQueue;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    ready: bool,
    checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    database: bool,
    queue: bool,
}

/// `GET /health` - liveness. Returns 200 unconditionally; the process being
/// able to answer at all is the signal.
pub async fn health() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
        }),
    )
}

/// `GET /ready` - checks the queue service and DB respond to probes.
pub async fn readiness(
    State(pool): State<DbPool>,
    State(queue): State<Arc<dyn IntakeQueue>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let database = db::check_database(&pool).await;
    let queue_ok = queue.ping().await.is_ok();

    let ready = database && queue_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            checks: ReadinessChecks {
                database,
                queue: queue_ok,
            },
        }),
    )
}
