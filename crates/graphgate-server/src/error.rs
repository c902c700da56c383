//! HTTP error mapping.
//!
//! Library crates return typed outcomes; this module is the single place
//! where they become status codes, JSON bodies, and `Retry-After` headers.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use graphgate_credits::CreditStoreError;
use graphgate_queue::SubmitError;
use graphgate_robustness::{CircuitError, RateLimitExceeded};
use graphgate_sse::ConnectionError;
use serde_json::{json, Value};

/// Errors surfaced to HTTP clients.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    PaymentRequired(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// Interactive timeout with an instructive body.
    #[error("query timeout")]
    Timeout(Value),
    #[error("{detail}")]
    TooManyRequests {
        detail: String,
        retry_after: Option<u64>,
    },
    #[error("{detail}")]
    ServiceUnavailable { detail: String, retry_after: u64 },
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retry_after, body) = match self {
            ApiError::BadRequest(detail) => {
                (StatusCode::BAD_REQUEST, None, json!({ "detail": detail }))
            }
            ApiError::Unauthorized(detail) => {
                (StatusCode::UNAUTHORIZED, None, json!({ "detail": detail }))
            }
            ApiError::PaymentRequired(detail) => (
                StatusCode::PAYMENT_REQUIRED,
                None,
                json!({ "detail": detail }),
            ),
            ApiError::Forbidden(detail) => {
                (StatusCode::FORBIDDEN, None, json!({ "detail": detail }))
            }
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, None, json!({ "detail": detail })),
            ApiError::Timeout(body) => (StatusCode::REQUEST_TIMEOUT, None, body),
            ApiError::TooManyRequests {
                detail,
                retry_after,
            } => (
                StatusCode::TOO_MANY_REQUESTS,
                retry_after,
                json!({ "detail": detail }),
            ),
            ApiError::ServiceUnavailable {
                detail,
                retry_after,
            } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Some(retry_after),
                json!({ "detail": detail }),
            ),
            ApiError::Internal(detail) => {
                tracing::error!(%detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    None,
                    json!({ "detail": "An unexpected error occurred while processing your request" }),
                )
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = seconds.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

impl From<CircuitError> for ApiError {
    fn from(err: CircuitError) -> Self {
        ApiError::ServiceUnavailable {
            detail: err.to_string(),
            retry_after: err.retry_after_seconds(),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match &err {
            SubmitError::Rejected { .. } => ApiError::ServiceUnavailable {
                detail: err.to_string(),
                retry_after: 30,
            },
            SubmitError::QueueFull { .. } => ApiError::ServiceUnavailable {
                detail: err.to_string(),
                retry_after: 60,
            },
            SubmitError::UserLimit { .. } => ApiError::TooManyRequests {
                detail: err.to_string(),
                retry_after: None,
            },
        }
    }
}

impl From<RateLimitExceeded> for ApiError {
    fn from(err: RateLimitExceeded) -> Self {
        ApiError::TooManyRequests {
            retry_after: Some(err.retry_after_seconds),
            detail: err.to_string(),
        }
    }
}

impl From<ConnectionError> for ApiError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::LimitExceeded { .. } => ApiError::TooManyRequests {
                detail: err.to_string(),
                retry_after: None,
            },
            ConnectionError::RateLimited {
                retry_after_seconds,
            } => ApiError::TooManyRequests {
                detail: err.to_string(),
                retry_after: Some(retry_after_seconds),
            },
        }
    }
}

impl From<CreditStoreError> for ApiError {
    fn from(err: CreditStoreError) -> Self {
        ApiError::Internal(err.to_string())
    }
}
