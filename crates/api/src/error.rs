use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::{Json, http::StatusCode, response::IntoResponse};
use obrolan_domain::error::{DomainError, FieldError};
use obrolan_domain::util::{format_ms_rfc3339, now_ms};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Vec<FieldError>,
    },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("conflict")]
    Conflict,
    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn validation(details: Vec<FieldError>) -> Self {
        ApiError::Validation {
            message: "validation failed".to_string(),
            details,
        }
    }

    pub fn invalid(field: &str, message: &str) -> Self {
        Self::validation(vec![FieldError::new(field, message)])
    }

    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized("authentication required".to_string())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict => StatusCode::CONFLICT,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "validation_error",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict => "conflict",
            ApiError::Internal => "internal_error",
        }
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Validation(details) => ApiError::validation(details),
            DomainError::Unauthorized(message) => ApiError::Unauthorized(message),
            DomainError::NotFound(message) => ApiError::NotFound(message),
            DomainError::Conflict => ApiError::Conflict,
            DomainError::Storage(message) => {
                tracing::error!(error = %message, "store operation failed");
                ApiError::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        tracing::debug!(error = %rejection, "rejected request body");
        ApiError::invalid("body", &rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        tracing::debug!(error = %rejection, "rejected query string");
        ApiError::invalid("query", &rejection.body_text())
    }
}

/// `Json` extractor whose rejections render as the API error envelope.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<FieldError>,
    timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();
        let details = match self {
            ApiError::Validation { details, .. } => details,
            _ => Vec::new(),
        };
        let body = ErrorEnvelope {
            error: ErrorBody {
                code,
                message,
                details,
                timestamp: format_ms_rfc3339(now_ms()),
            },
        };
        (status, Json(body)).into_response()
    }
}
