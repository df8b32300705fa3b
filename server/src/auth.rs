//! Bearer token authentication for the post API.
//!
//! Clients send an HS256 JWT in the `Authorization` header, either bare or
//! with a `Bearer ` prefix. The token carries the caller's principal id in a
//! `userId` claim. Verification produces that id or an [`AuthError`].
//!
//! The WebSocket endpoint is not authenticated.
//!
//! # Example
//!
//! ```rust
//! use posthub_server::auth::{Authenticator, JwtAuthenticator, default_token_ttl};
//!
//! let auth = JwtAuthenticator::new(b"secret");
//! let token = auth.issue("user-1", default_token_ttl()).unwrap();
//!
//! assert_eq!(auth.verify(&token).unwrap(), "user-1");
//! assert_eq!(auth.verify(&format!("Bearer {token}")).unwrap(), "user-1");
//! ```

use std::fmt;
use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::ServerError;

/// Lifetime of issued tokens: two days.
#[must_use]
pub fn default_token_ttl() -> Duration {
    Duration::days(2)
}

/// Errors that can occur while verifying or issuing a token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was supplied.
    #[error("missing authorization token")]
    MissingToken,

    /// The token is malformed, has a bad signature, or lacks a principal.
    #[error("invalid token")]
    InvalidToken,

    /// The token was valid but has expired.
    #[error("token expired")]
    ExpiredToken,

    /// A token could not be signed.
    #[error("failed to issue token")]
    IssueFailed,
}

impl AuthError {
    /// Machine-readable code for API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "expired_token",
            Self::IssueFailed => "server_error",
        }
    }
}

/// Claims carried by posthub tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id of the token holder.
    #[serde(rename = "userId")]
    pub user_id: String,

    /// Expiry as a Unix timestamp in seconds.
    pub exp: i64,
}

/// Verifies a bearer credential and yields the principal id it names.
pub trait Authenticator: Send + Sync {
    /// Returns the verified principal id for `credential`.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] if the credential is missing, invalid, or
    /// expired.
    fn verify(&self, credential: &str) -> Result<String, AuthError>;
}

/// HS256 JWT verifier and issuer.
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Creates an authenticator for the shared `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Issues a token for `user_id` that expires after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::IssueFailed`] if signing fails.
    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String, AuthError> {
        let claims = Claims {
            user_id: user_id.to_string(),
            exp: (Utc::now() + ttl).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| AuthError::IssueFailed)
    }
}

impl Authenticator for JwtAuthenticator {
    fn verify(&self, credential: &str) -> Result<String, AuthError> {
        let token = strip_bearer(credential);
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            },
        )?;

        if data.claims.user_id.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        Ok(data.claims.user_id)
    }
}

impl fmt::Debug for JwtAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtAuthenticator")
            .field("algorithm", &"HS256")
            .finish_non_exhaustive()
    }
}

/// Removes an optional `Bearer ` scheme prefix and surrounding whitespace.
fn strip_bearer(credential: &str) -> &str {
    let credential = credential.trim();
    match credential.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => credential[7..].trim(),
        _ => credential,
    }
}

/// The verified caller of a request.
///
/// Extracting this rejects the request with `401 Unauthorized` unless the
/// `Authorization` header carries a valid token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// Principal id from the token.
    pub user_id: String,
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    Arc<dyn Authenticator>: FromRef<S>,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authenticator = <Arc<dyn Authenticator> as FromRef<S>>::from_ref(state);
        let credential = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        match authenticator.verify(credential) {
            Ok(user_id) => Ok(Self { user_id }),
            Err(err) => {
                debug!(error = %err, path = %parts.uri.path(), "Request authentication failed");
                Err(ServerError::Auth(err))
            }
        }
    }
}
