#[cfg(feature = "server")]
use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
#[cfg(feature = "server")]
use utoipa::ToSchema;

#[cfg_attr(feature = "server", derive(ToSchema))]
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// Missing or invalid field, undecodable media.
    BadRequest(String),
    /// Media exceeds its configured limit.
    PayloadTooLarge(String),
    /// The model client or blob store was never configured.
    Misconfigured(String),
    /// The model endpoint or blob store call failed.
    UpstreamFailure(String),
}

impl fmt::Display for ApiError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {msg}"),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload too large: {msg}"),
            ApiError::Misconfigured(msg) => write!(f, "Service unavailable: {msg}"),
            ApiError::UpstreamFailure(msg) => write!(f, "Upstream failure: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    pub fn payload_too_large(msg: impl Into<String>) -> Self {
        ApiError::PayloadTooLarge(msg.into())
    }

    pub fn misconfigured(msg: impl Into<String>) -> Self {
        ApiError::Misconfigured(msg.into())
    }

    pub fn upstream_failure(msg: impl Into<String>) -> Self {
        ApiError::UpstreamFailure(msg.into())
    }

    /// HTTP status code and machine-readable error code for this kind.
    #[must_use]
    pub const fn status_and_code(&self) -> (u16, &'static str) {
        match self {
            ApiError::BadRequest(_) => (400, "BAD_REQUEST"),
            ApiError::PayloadTooLarge(_) => (413, "PAYLOAD_TOO_LARGE"),
            ApiError::Misconfigured(_) => (503, "SERVICE_UNAVAILABLE"),
            ApiError::UpstreamFailure(_) => (502, "UPSTREAM_FAILURE"),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::Misconfigured(msg)
            | ApiError::UpstreamFailure(msg) => msg,
        }
    }

    #[must_use]
    pub fn to_error_response(&self) -> ErrorResponse {
        let (status_code, error_type) = self.status_and_code();
        ErrorResponse {
            error: error_type.to_string(),
            message: self.message().to_string(),
            status_code,
        }
    }
}

#[cfg(feature = "server")]
impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        let (status_code, _) = self.status_and_code();
        StatusCode::from_u16(status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.to_error_response())
    }
}
