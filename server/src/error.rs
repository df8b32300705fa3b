//! Error types for the posthub server.
//!
//! Each module owns a narrow `thiserror` enum ([`AuthError`], [`StoreError`],
//! [`HubError`](crate::hub::HubError)). Handlers fold them into
//! [`ServerError`], which knows how to render itself as an HTTP response.
//!
//! # Example
//!
//! ```rust
//! use posthub_server::error::ServerError;
//!
//! fn validate_content(content: &str) -> Result<(), ServerError> {
//!     if content.trim().is_empty() {
//!         return Err(ServerError::validation("post_content cannot be empty"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(validate_content("").is_err());
//! ```

use std::error::Error;
use std::fmt;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// JSON error body returned by every failing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable description.
    pub error: String,

    /// Machine-readable error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    /// Creates an error body without a code.
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    /// Attaches a machine-readable code.
    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Top-level error type for the posthub server.
#[derive(Debug)]
pub enum ServerError {
    /// The caller could not be authenticated.
    Auth(AuthError),

    /// Request body or query failed validation.
    Validation(String),

    /// The addressed resource does not exist.
    NotFound(String),

    /// The caller is authenticated but may not act on the resource.
    Forbidden(String),

    /// The request body exceeded the configured limit.
    PayloadTooLarge,

    /// WebSocket handshake or protocol error.
    WebSocket(String),

    /// Unexpected internal server error.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auth(err) => write!(f, "authentication failed: {err}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Forbidden(msg) => write!(f, "forbidden: {msg}"),
            Self::PayloadTooLarge => write!(f, "request body too large"),
            Self::WebSocket(msg) => write!(f, "websocket error: {msg}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Auth(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            StoreError::NotOwner(_) => Self::Forbidden(err.to_string()),
            StoreError::Duplicate(_) => Self::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::PayloadTooLarge;
        }
        Self::Validation(format!("invalid request body: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ServerError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(format!("invalid query: {}", rejection.body_text()))
    }
}

impl ServerError {
    /// Creates a new validation error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use posthub_server::error::ServerError;
    ///
    /// let err = ServerError::validation("missing 'post_content' field");
    /// assert!(matches!(err, ServerError::Validation(_)));
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Creates a new WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket(message.into())
    }

    /// Creates a new internal error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use posthub_server::error::ServerError;
    ///
    /// let err = ServerError::internal("post store unavailable");
    /// assert!(matches!(err, ServerError::Internal(_)));
    /// ```
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if this error indicates a client-side problem.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Auth(_)
                | Self::Validation(_)
                | Self::NotFound(_)
                | Self::Forbidden(_)
                | Self::PayloadTooLarge
        )
    }

    /// Returns `true` if this error indicates a server-side problem.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::Internal(_) | Self::WebSocket(_)
        )
    }

    /// HTTP status this error maps to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(AuthError::IssueFailed) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::WebSocket(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for the response body.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Auth(err) => err.code(),
            Self::Validation(_) => "invalid_format",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::PayloadTooLarge => "payload_too_large",
            Self::WebSocket(_) => "upgrade_failed",
            Self::Internal(_) => "server_error",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        // Internal details stay in the logs.
        let message = if self.is_server_error() {
            error!(error = %self, "Request failed with server error");
            "internal server error".to_string()
        } else {
            match &self {
                Self::Auth(err) => err.to_string(),
                Self::Validation(msg) | Self::NotFound(msg) | Self::Forbidden(msg) => msg.clone(),
                _ => self.to_string(),
            }
        };

        let body = ErrorResponse::new(message).with_code(self.code());
        (self.status_code(), Json(body)).into_response()
    }
}

/// A specialized Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;
