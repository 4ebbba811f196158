//! Protocol error types.
//!
//! Implements OAuth 2.0 and `OpenID` Connect error responses as defined in:
//! - RFC 6749 (OAuth 2.0)
//! - `OpenID` Connect Core 1.0

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol errors.
///
/// Validation failures are returned, never panicked; each maps to a
/// registered error code and an endpoint-dependent response shape.
#[derive(Debug, Error)]
pub enum OidcError {
    /// Invalid request parameters.
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    /// Client authentication or client validation failed.
    #[error("invalid_client: {0}")]
    InvalidClient(String),

    /// Invalid or expired authorization grant.
    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    /// Client is not authorized for this grant type.
    #[error("unauthorized_client: {0}")]
    UnauthorizedClient(String),

    /// Unsupported grant type.
    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    /// Unsupported response type.
    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),

    /// The `request` parameter is not supported.
    #[error("request_not_supported: {0}")]
    RequestNotSupported(String),

    /// The `request_uri` parameter is not supported.
    #[error("request_uri_not_supported: {0}")]
    RequestUriNotSupported(String),

    /// Internal invariant violation.
    #[error("server_error: {0}")]
    ServerError(String),

    /// Invalid middleware configuration, reported at construction.
    #[error("configuration error: {0}")]
    Config(String),

    /// Cache backend failure.
    #[error("cache error: {0}")]
    Cache(String),
}

impl OidcError {
    /// Returns the registered OAuth 2.0 error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnauthorizedClient(_) => "unauthorized_client",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::RequestNotSupported(_) => "request_not_supported",
            Self::RequestUriNotSupported(_) => "request_uri_not_supported",
            Self::ServerError(_) | Self::Config(_) | Self::Cache(_) => "server_error",
        }
    }

    /// Returns whether this error is an internal failure rather than a
    /// client mistake.
    #[must_use]
    pub const fn is_server_error(&self) -> bool {
        matches!(self, Self::ServerError(_) | Self::Config(_) | Self::Cache(_))
    }

    /// Converts the error into a wire payload.
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: self.error_code().to_string(),
            error_description: Some(self.description()),
            error_uri: None,
        }
    }

    fn description(&self) -> String {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidGrant(d)
            | Self::UnauthorizedClient(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::RequestNotSupported(d)
            | Self::RequestUriNotSupported(d)
            | Self::ServerError(d)
            | Self::Config(d)
            | Self::Cache(d) => d.clone(),
        }
    }
}

/// OAuth 2.0 error payload.
///
/// The wire form shared by JSON error bodies, redirect error parameters,
/// and the native error page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code.
    pub error: String,

    /// Human-readable error description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// URI with more information about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_uri: Option<String>,
}

impl ErrorPayload {
    /// Creates a payload with a code only.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_description: None,
            error_uri: None,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.error_description = Some(description.into());
        self
    }

    /// Sets the error URI.
    #[must_use]
    pub fn with_uri(mut self, uri: impl Into<String>) -> Self {
        self.error_uri = Some(uri.into());
        self
    }
}

/// Result type for protocol operations.
pub type OidcResult<T> = Result<T, OidcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            OidcError::InvalidRequest("x".into()).error_code(),
            "invalid_request"
        );
        assert_eq!(
            OidcError::UnsupportedResponseType("x".into()).error_code(),
            "unsupported_response_type"
        );
        assert_eq!(OidcError::Cache("down".into()).error_code(), "server_error");
    }

    #[test]
    fn payload_serialization_skips_absent_fields() {
        let payload = ErrorPayload::new("invalid_grant");
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"error":"invalid_grant"}"#);

        let payload = payload.with_description("code expired");
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains("error_description"));
        assert!(!json.contains("error_uri"));
    }

    #[test]
    fn server_error_classification() {
        assert!(OidcError::ServerError("x".into()).is_server_error());
        assert!(!OidcError::InvalidGrant("x".into()).is_server_error());
    }
}
