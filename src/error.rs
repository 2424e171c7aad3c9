use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Stable machine-readable error codes carried in the `error.code` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "FORBIDDEN")]
    Forbidden,
    #[serde(rename = "NOT_FOUND")]
    NotFound,
    #[serde(rename = "CONFLICT")]
    Conflict,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "SERVICE_UNAVAILABLE")]
    ServiceUnavailable,
}

#[derive(Error, Debug)]
pub enum AppError {
    /// Input failed a domain validation rule (bounds, enumerations, references).
    #[error("{0}")]
    Validation(String),

    /// Request body did not match the expected shape.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Resource-state conflicts: terminal-order mutation, duplicate mobile number.
    #[error("{0}")]
    Conflict(String),

    #[error("service unavailable")]
    Unavailable,

    #[error("internal error: {0}")]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn internal<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        AppError::Internal(Box::new(err))
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) => ErrorCode::InvalidInput,
            AppError::MalformedPayload(_) => ErrorCode::ValidationError,
            AppError::Unauthorized => ErrorCode::Unauthorized,
            AppError::Forbidden(_) => ErrorCode::Forbidden,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::Conflict(_) => ErrorCode::Conflict,
            AppError::Unavailable => ErrorCode::ServiceUnavailable,
            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        // 4xx renders as "fail", 5xx as "error" in the stable envelope.
        let envelope_status = if status.is_server_error() { "error" } else { "fail" };

        let mut error_body = json!({ "code": self.code() });
        // Source detail is only exposed in debug builds.
        #[cfg(debug_assertions)]
        if let AppError::Internal(source) = &self {
            error_body["detail"] = json!(source.to_string());
        }

        let body = json!({
            "status": envelope_status,
            "message": self.to_string(),
            "error": error_body,
        });

        (status, Json(body)).into_response()
    }
}

/// Mutex-poisoning and other store-level faults surface as 503 at steady state.
impl<T> From<std::sync::PoisonError<T>> for AppError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        AppError::Unavailable
    }
}

/// Body-shape failures from the Json extractor render in the stable envelope.
impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        AppError::MalformedPayload(rejection.body_text())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("not found".into()),
            other => AppError::Internal(Box::new(other)),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(Box::new(err))
    }
}

/// Success envelope: `{status: "success", message?, data?}`.
pub fn success(message: &str, data: serde_json::Value) -> Json<serde_json::Value> {
    Json(json!({ "status": "success", "message": message, "data": data }))
}
