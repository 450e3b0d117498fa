//! Error types for the proxy.
//!
//! Every variant maps onto one HTTP status and one stable `type` string, so a
//! failure anywhere in the request path renders as
//! `{"error": {"message": ..., "type": ...}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::translate::openai_types::ChatErrorResponse;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{message}")]
    Validation { message: String },

    #[error("{message}")]
    Unauthorized { message: String },

    #[error("Upstream error: {message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("Upstream did not respond within {secs}s")]
    Timeout { secs: u64 },

    #[error("Malformed upstream response: {message}")]
    Shaping { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ProxyError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: msg.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: msg.into(),
        }
    }

    pub fn upstream_status(status: u16, msg: impl Into<String>) -> Self {
        Self::Upstream {
            status: Some(status),
            message: msg.into(),
        }
    }

    pub fn shaping(msg: impl Into<String>) -> Self {
        Self::Shaping {
            message: msg.into(),
        }
    }

    /// Status code returned to the caller.
    ///
    /// Upstream failures forward the upstream's own status when it is a real
    /// error status; transport failures and timeouts become 500.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Upstream {
                status: Some(code), ..
            } => StatusCode::from_u16(*code)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `type` field of the error body.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "invalid_request_error",
            Self::Unauthorized { .. } => "authentication_error",
            Self::Upstream { .. } | Self::Timeout { .. } | Self::Http(_) => "upstream_error",
            Self::Shaping { .. } => "shaping_error",
            Self::Config { .. } | Self::Toml(_) => "server_error",
        }
    }

    pub fn to_body(&self) -> ChatErrorResponse {
        ChatErrorResponse::new(self.error_type(), self.to_string())
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ProxyError::validation("no user message").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::upstream("connection refused").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::upstream_status(429, "slow down").status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ProxyError::Timeout { secs: 5 }.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::shaping("missing content").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_successful_upstream_status_is_not_forwarded() {
        let err = ProxyError::upstream_status(200, "odd");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_types() {
        assert_eq!(ProxyError::Timeout { secs: 1 }.error_type(), "upstream_error");
        assert_eq!(ProxyError::shaping("x").error_type(), "shaping_error");
        assert_eq!(ProxyError::config("x").error_type(), "server_error");
        assert_eq!(ProxyError::unauthorized("x").error_type(), "authentication_error");
    }

    #[test]
    fn test_error_body_shape() {
        let body = ProxyError::validation("Request contains no user message").to_body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request_error");
        assert_eq!(json["error"]["message"], "Request contains no user message");
    }
}
