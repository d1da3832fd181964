//! Mapping from domain errors to JSON responses.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use studyforge::consent::ConsentError;
use studyforge::ledger::LedgerError;
use studyforge::store::StoreError;
use studyforge::GenerationError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Consent(#[from] ConsentError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        let code = match self {
            ApiError::Unauthorized(_) => 401,
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound(_) => 404,
            ApiError::Generation(e) => e.status_code(),
            ApiError::Ledger(LedgerError::UnknownAccount(_)) => 404,
            ApiError::Ledger(_) => 500,
            ApiError::Store(StoreError::NotFound(_)) => 404,
            ApiError::Store(StoreError::NotAQuiz(_) | StoreError::InvalidScore { .. }) => 400,
            ApiError::Store(StoreError::Backend(_)) => 500,
            ApiError::Consent(e) => e.status_code(),
        };
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn body(&self) -> serde_json::Value {
        match self {
            ApiError::Generation(GenerationError::InsufficientCredits { available, required }) => json!({
                "error": self.to_string(),
                "available_credits": available,
                "required_credits": required,
            }),
            ApiError::Generation(GenerationError::RateLimited { retry_after }) => json!({
                "error": self.to_string(),
                "retryAfter": retry_after.as_secs(),
            }),
            ApiError::Generation(e) if e.is_post_debit() => json!({
                "error": self.to_string(),
                "refunded": e.refunded(),
            }),
            ApiError::Ledger(LedgerError::Backend(_))
            | ApiError::Store(StoreError::Backend(_))
            | ApiError::Consent(ConsentError::Store(_)) => json!({ "error": "internal server error" }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(target: "studyforge::server", status = status.as_u16(), error = %self, "request failed");
        }
        let mut response = (status, Json(self.body())).into_response();
        if let ApiError::Generation(GenerationError::RateLimited { retry_after }) = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
