//! Error types for the alerting API.

use std::net::SocketAddr;

use alerting_core::{AlertingError, CapacityKind};
use alerting_notify::NotifyError;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// An error from the alerting engine.
    #[error(transparent)]
    Alerting(#[from] AlertingError),

    /// The request itself is malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The recipient datasource cannot serve the requested API family.
    #[error("unexpected backend type: datasource {uid} is {ds_type}, expected {expected}")]
    UnexpectedBackend {
        /// Datasource UID.
        uid: String,
        /// Its type.
        ds_type: String,
        /// What the API family accepts.
        expected: &'static str,
    },

    /// The proxied backend answered with an error; passed through unchanged.
    #[error("upstream returned status {status}")]
    Upstream {
        /// Upstream status code.
        status: u16,
        /// Upstream content type.
        content_type: Option<String>,
        /// Upstream body.
        body: Bytes,
    },

    /// The proxied backend could not be reached.
    #[error("upstream request failed: {0}")]
    UpstreamUnavailable(String),

    /// The proxied backend did not answer in time.
    #[error("upstream request timed out")]
    UpstreamTimeout,

    /// The proxied backend answered with a body that does not decode.
    #[error("invalid upstream response: {0}")]
    InvalidUpstreamResponse(String),

    /// Failed to bind the listen address.
    #[error("failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, std::io::Error),

    /// The HTTP server failed.
    #[error("server error: {0}")]
    Server(String),
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        Self::Alerting(err.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(err.to_string())
    }
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
}

impl ApiError {
    /// HTTP status and error code of this error.
    #[must_use]
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Alerting(err) => match err {
                AlertingError::Config { .. } | AlertingError::Serialization(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_request")
                }
                AlertingError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
                AlertingError::VersionConflict { .. } => (StatusCode::CONFLICT, "version_conflict"),
                AlertingError::Capacity {
                    kind: CapacityKind::Quota,
                    ..
                } => (StatusCode::FORBIDDEN, "quota_exceeded"),
                AlertingError::Capacity {
                    kind: CapacityKind::Concurrency,
                    ..
                } => (StatusCode::TOO_MANY_REQUESTS, "too_many_requests"),
                AlertingError::Delivery { .. } => (StatusCode::BAD_GATEWAY, "delivery_failed"),
                AlertingError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
                AlertingError::SchedulerStopped => {
                    (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable")
                }
                AlertingError::Evaluation { .. } | AlertingError::Persistence { .. } => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
                }
            },
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            Self::UnexpectedBackend { .. } => (StatusCode::BAD_REQUEST, "unexpected_backend"),
            Self::Upstream { status, .. } => (
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
                "upstream_error",
            ),
            Self::UpstreamUnavailable(_) | Self::InvalidUpstreamResponse(_) => {
                (StatusCode::BAD_GATEWAY, "bad_gateway")
            }
            Self::UpstreamTimeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Self::BindFailed(_, _) | Self::Server(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = self.status();

        if let Self::Upstream {
            content_type, body, ..
        } = self
        {
            let content_type = content_type.unwrap_or_else(|| "text/plain".to_string());
            return (status, [(header::CONTENT_TYPE, content_type)], body).into_response();
        }

        let body = ErrorResponse {
            error,
            message: self.to_string(),
        };
        let json = serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"error":"internal_error","message":"failed to serialize error"}"#.to_string()
        });

        (status, [(header::CONTENT_TYPE, "application/json")], json).into_response()
    }
}
