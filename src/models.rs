//! Database and wire models for courses, enrollments, the waitlist, and the
//! transient queued-request payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A course row. Invariant: `0 <= seats_taken <= capacity` at every
/// transaction boundary (enforced by the allocator, never by the schema).
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub capacity: i32,
    pub seats_taken: i32,
}

/// An enrollment row. Created exactly once by the allocator on a successful
/// allocation; never mutated; never deleted.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Enrollment {
    pub id: i64,
    pub student_id: i64,
    pub course_id: i64,
    pub idempotency_key: String,
    pub booked_at: DateTime<Utc>,
}

/// A waitlist row: a unique (student, course) pair. Never mutated.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct WaitlistEntry {
    pub student_id: i64,
    pub course_id: i64,
}

/// The transient payload stored in the per-course ordered intake queue.
///
/// Field order is significant: this is serialized with `serde_json` to
/// produce the canonical member encoding the queue keys on, so the same
/// logical request must always serialize to the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub student_id: i64,
    pub course_id: i64,
    pub idempotency_key: String,
}

/// The structured outcome of an allocation transaction, returned to the
/// allocator worker loop for logging and metrics, never to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationOutcome {
    Success,
    Waitlisted,
    NotFound,
    AlreadyProcessed,
}

impl AllocationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationOutcome::Success => "success",
            AllocationOutcome::Waitlisted => "waitlisted",
            AllocationOutcome::NotFound => "not_found",
            AllocationOutcome::AlreadyProcessed => "already_processed",
        }
    }
}
