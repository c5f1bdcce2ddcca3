use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

/// JSON extractor that rejects with 422 (rather than Axum's default 400) on
/// a malformed body, matching this service's "422 on schema violation"
/// contract.
pub struct LoggedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for LoggedJson<T>
where
    T: serde::de::DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = match Bytes::from_request(req, state).await {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to read request body: {}", e);
                return Err(
                    (StatusCode::UNPROCESSABLE_ENTITY, "Failed to read request body").into_response(),
                );
            }
        };

        match serde_json::from_slice::<T>(&bytes) {
            Ok(value) => Ok(LoggedJson(value)),
            Err(e) => {
                error!("JSON deserialization error: {}", e);
                let error_msg = format!("Invalid request body: {}", e);
                Err((StatusCode::UNPROCESSABLE_ENTITY, error_msg).into_response())
            }
        }
    }
}
