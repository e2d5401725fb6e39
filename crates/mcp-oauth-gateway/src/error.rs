//! Error types for the OAuth gateway.
//!
//! Uses `thiserror` for structured error handling with automatic `From` implementations.
//! Every error that reaches a client is rendered as an [`OAuthError`] with the
//! RFC 6749 `{"error", "error_description"}` body.

use std::borrow::Cow;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors from the persistent store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Redis command or connection failure
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Stored value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the upstream identity provider (GitHub).
#[derive(thiserror::Error, Debug)]
pub enum UpstreamError {
    /// HTTP transport error (connection, DNS, TLS, timeout, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// GitHub refused the code exchange
    #[error("Code exchange rejected: {error}")]
    ExchangeRejected {
        /// Error code from GitHub (e.g. `bad_verification_code`)
        error: String,
    },

    /// Unexpected HTTP status
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },
}

impl UpstreamError {
    /// Create an exchange rejected error.
    #[must_use]
    pub fn rejected(error: impl Into<String>) -> Self {
        Self::ExchangeRejected { error: error.into() }
    }
}

/// OAuth 2.0 error codes used across all endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    InvalidClientMetadata,
    InvalidRedirectUri,
    UnsupportedGrantType,
    UnsupportedResponseType,
    AccessDenied,
    InvalidToken,
    ServerError,
}

impl ErrorCode {
    /// Wire representation, as used in JSON bodies and redirect query strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::InvalidClientMetadata => "invalid_client_metadata",
            Self::InvalidRedirectUri => "invalid_redirect_uri",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::AccessDenied => "access_denied",
            Self::InvalidToken => "invalid_token",
            Self::ServerError => "server_error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An OAuth error ready to be returned to a client.
#[derive(thiserror::Error, Debug)]
#[error("{code}: {description}")]
pub struct OAuthError {
    pub code: ErrorCode,
    pub description: Cow<'static, str>,
    pub status: StatusCode,
    /// Value for the `WWW-Authenticate` header, if any.
    pub challenge: Option<&'static str>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorCode,
    error_description: &'a str,
}

impl OAuthError {
    /// Create an error with an explicit status.
    #[must_use]
    pub fn new(
        code: ErrorCode,
        status: StatusCode,
        description: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self { code, description: description.into(), status, challenge: None }
    }

    #[must_use]
    pub fn invalid_request(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidRequest, StatusCode::BAD_REQUEST, description)
    }

    /// Client authentication failed at the token endpoint (401 + Basic challenge).
    #[must_use]
    pub fn invalid_client(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidClient, StatusCode::UNAUTHORIZED, description)
            .with_challenge("Basic")
    }

    /// Unknown client on `/authorize`, answered without a redirect.
    #[must_use]
    pub fn unknown_client(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidClient, StatusCode::BAD_REQUEST, description)
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidGrant, StatusCode::BAD_REQUEST, description)
    }

    #[must_use]
    pub fn invalid_client_metadata(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidClientMetadata, StatusCode::BAD_REQUEST, description)
    }

    #[must_use]
    pub fn invalid_redirect_uri(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidRedirectUri, StatusCode::BAD_REQUEST, description)
    }

    #[must_use]
    pub fn unsupported_grant_type(grant_type: &str) -> Self {
        Self::new(
            ErrorCode::UnsupportedGrantType,
            StatusCode::BAD_REQUEST,
            format!("Grant type '{grant_type}' is not supported"),
        )
    }

    /// Missing or malformed bearer credentials (401 + Bearer challenge).
    #[must_use]
    pub fn missing_bearer(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidRequest, StatusCode::UNAUTHORIZED, description)
            .with_challenge("Bearer")
    }

    /// Bearer token rejected (401 + Bearer challenge).
    #[must_use]
    pub fn invalid_token(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidToken, StatusCode::UNAUTHORIZED, description)
            .with_challenge("Bearer error=\"invalid_token\"")
    }

    /// Registration access token does not match the client (403).
    #[must_use]
    pub fn forbidden(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::InvalidToken, StatusCode::FORBIDDEN, description)
    }

    #[must_use]
    pub fn client_not_found() -> Self {
        Self::new(ErrorCode::InvalidClient, StatusCode::NOT_FOUND, "Client not found")
    }

    #[must_use]
    pub fn server_error(description: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ServerError, StatusCode::INTERNAL_SERVER_ERROR, description)
    }

    #[must_use]
    pub fn with_challenge(mut self, challenge: &'static str) -> Self {
        self.challenge = Some(challenge);
        self
    }
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Store operation failed");
        Self::server_error("Storage backend unavailable")
    }
}

impl From<jsonwebtoken::errors::Error> for OAuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        tracing::error!(error = %err, "Token signing failed");
        Self::server_error("Failed to issue token")
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.code, error_description: &self.description };
        let mut response = (self.status, Json(body)).into_response();

        let headers = response.headers_mut();
        if let Some(challenge) = self.challenge {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        response
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for upstream calls.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Result type alias for OAuth operations.
pub type OAuthResult<T> = Result<T, OAuthError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_names() {
        assert_eq!(ErrorCode::InvalidClientMetadata.as_str(), "invalid_client_metadata");
        assert_eq!(
            serde_json::to_value(ErrorCode::UnsupportedResponseType).unwrap(),
            "unsupported_response_type"
        );
    }

    #[test]
    fn test_invalid_client_carries_basic_challenge() {
        let response = OAuthError::invalid_client("Unknown client").into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Basic");
    }

    #[test]
    fn test_forbidden_has_no_challenge() {
        let response = OAuthError::forbidden("wrong token").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[test]
    fn test_store_error_becomes_server_error() {
        let err: OAuthError = StoreError::Serialization(
            serde_json::from_str::<serde_json::Value>("{").unwrap_err(),
        )
        .into();
        assert_eq!(err.code, ErrorCode::ServerError);
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.description.contains("EOF"));
    }
}
