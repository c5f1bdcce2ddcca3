//! `POST /enroll` - the intake endpoint. Validates, scores, enqueues, and
//! reports queue position. Never touches the relational store; the
//! allocation outcome is observed later via the read APIs.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::QueuedRequest;
use crate::queue::{self, IntakeQueue};
use crate::util::json_extractor::LoggedJson;

const MAX_IDEMPOTENCY_KEY_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub student_id: i64,
    pub course_id: i64,
    pub idempotency_key: String,
    #[serde(default)]
    pub priority: i64,
}

#[derive(Debug, Serialize)]
pub struct EnrollResponse {
    pub status: &'static str,
    pub queue_position: Option<u64>,
}

fn validate(req: &EnrollRequest) -> Result<(), Error> {
    if req.idempotency_key.is_empty() || req.idempotency_key.len() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(Error::Validation(format!(
            "idempotency_key must be 1-{} characters",
            MAX_IDEMPOTENCY_KEY_LEN
        )));
    }
    if req.priority < 0 {
        return Err(Error::Validation("priority must be >= 0".to_string()));
    }
    Ok(())
}

pub async fn enroll(
    State(queue): State<Arc<dyn IntakeQueue>>,
    LoggedJson(req): LoggedJson<EnrollRequest>,
) -> Result<Json<EnrollResponse>, Error> {
    validate(&req)?;

    let queued = QueuedRequest {
        student_id: req.student_id,
        course_id: req.course_id,
        idempotency_key: req.idempotency_key,
    };

    let score = queue::compute_score(queue::now_micros(), req.priority);

    // If the queue service is unreachable this bubbles up to a 503; the
    // client is expected to retry with the same idempotency key.
    queue.add(req.course_id, &queued, score).await?;

    metrics::counter!("enrollment_requests_total", "status" => "queued").increment(1);

    let rank = queue.rank(req.course_id, &queued).await.unwrap_or(None);

    Ok(Json(EnrollResponse {
        status: "queued",
        queue_position: rank.map(|r| r + 1),
    }))
}
