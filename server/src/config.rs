//! Server configuration module.
//!
//! Parses configuration from environment variables for the posthub server.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `POSTHUB_JWT_SECRET` | Yes | - | HMAC secret used to verify bearer tokens |
//! | `PORT` | No | 8080 | HTTP server port |
//! | `POSTHUB_SEND_QUEUE_CAPACITY` | No | 64 | Messages buffered per WebSocket client |
//! | `POSTHUB_PAGE_SIZE` | No | 10 | Posts returned per page by `GET /posts` |

use std::env;
use std::fmt;

use thiserror::Error;

use crate::hub::DEFAULT_SEND_QUEUE_CAPACITY;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 8080;

/// Default number of posts per page.
const DEFAULT_PAGE_SIZE: usize = 10;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has invalid format.
    #[error("invalid format for {var}: {message}")]
    InvalidFormat { var: String, message: String },

    /// Port number is invalid.
    #[error("invalid port number: {0}")]
    InvalidPort(#[from] std::num::ParseIntError),
}

/// Server configuration parsed from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Secret for verifying HS256 bearer tokens.
    pub jwt_secret: String,

    /// HTTP server port.
    pub port: u16,

    /// Capacity of each WebSocket client's send queue.
    pub send_queue_capacity: usize,

    /// Number of posts per page when listing.
    pub page_size: usize,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `POSTHUB_JWT_SECRET` is missing or empty
    /// - Port number is not a valid u16
    /// - A numeric setting is not a positive integer
    ///
    /// # Example
    ///
    /// ```no_run
    /// use posthub_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let jwt_secret = match env::var("POSTHUB_JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => secret,
            _ => {
                return Err(ConfigError::MissingEnvVar(
                    "POSTHUB_JWT_SECRET".to_string(),
                ))
            }
        };

        Ok(Self {
            jwt_secret,
            port: parse_port()?,
            send_queue_capacity: parse_positive_env(
                "POSTHUB_SEND_QUEUE_CAPACITY",
                DEFAULT_SEND_QUEUE_CAPACITY,
            )?,
            page_size: parse_positive_env("POSTHUB_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
        })
    }

    /// Creates a configuration with defaults and the given secret.
    #[must_use]
    pub fn with_secret(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            port: DEFAULT_PORT,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("jwt_secret", &"<redacted>")
            .field("port", &self.port)
            .field("send_queue_capacity", &self.send_queue_capacity)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Parse the PORT environment variable.
///
/// Returns the default port if not set.
fn parse_port() -> Result<u16, ConfigError> {
    match env::var("PORT") {
        Ok(port_str) => Ok(port_str.trim().parse()?),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidFormat {
            var: "PORT".to_string(),
            message: "contains invalid unicode".to_string(),
        }),
    }
}

/// Parse a positive integer environment variable, falling back to `default`
/// when unset.
fn parse_positive_env(name: &str, default: usize) -> Result<usize, ConfigError> {
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(env::VarError::NotPresent) => return Ok(default),
        Err(env::VarError::NotUnicode(_)) => {
            return Err(ConfigError::InvalidFormat {
                var: name.to_string(),
                message: "contains invalid unicode".to_string(),
            })
        }
    };

    match raw.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: "must be greater than zero".to_string(),
        }),
        Ok(value) => Ok(value),
        Err(err) => Err(ConfigError::InvalidFormat {
            var: name.to_string(),
            message: format!("expected a positive integer, got '{raw}': {err}"),
        }),
    }
}
