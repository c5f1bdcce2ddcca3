//! Shared error types for the CourseFlow server

use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Rejected at intake, no side effects (maps to 422).
    Validation(String),
    /// Course id referenced by a request does not exist.
    NotFound(String),
    /// Queue or DB unreachable / timing out (maps to 503).
    ServiceUnavailable(String),
    Database(String),
    Queue(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "Validation error: {}", msg),
            Error::NotFound(msg) => write!(f, "Not found: {}", msg),
            Error::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            Error::Database(msg) => write!(f, "Database error: {}", msg),
            Error::Queue(msg) => write!(f, "Queue error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Error::Queue(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Error::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Error::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Error::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            Error::Queue(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
