//! Error taxonomy surfaced by the ERCOT client.

use std::time::Duration;

use thiserror::Error;

/// Convenience alias used across the ERCOT client.
pub type GridResult<T> = Result<T, GridError>;

/// Errors returned by every ERCOT client operation.
///
/// Transient variants (`Transport`, `Timeout`, `RateLimited`, 5xx `Api`)
/// are retried internally and only reach callers wrapped in
/// [`GridError::RetryExhausted`].
#[derive(Debug, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum GridError {
    /// Credentials were rejected, or a request kept failing with 401/403
    /// after one forced token refresh.
    #[error("{message}")]
    Authentication {
        /// Human-readable reason.
        message: String,
        /// HTTP status reported by the server, if any.
        status: Option<u16>,
    },

    /// Non-2xx response that is neither an auth rejection nor a rate limit.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Api {
        /// Endpoint label or path.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, kept for diagnostics.
        body: String,
    },

    /// The server answered 429.
    #[error("{endpoint} rate limited (HTTP 429)")]
    RateLimited {
        /// Endpoint label or path.
        endpoint: String,
        /// Server-provided `Retry-After`, if any.
        retry_after: Option<Duration>,
    },

    /// The request exceeded the configured timeout.
    #[error("{endpoint} request timed out")]
    Timeout {
        /// Endpoint label or path.
        endpoint: String,
    },

    /// Connection-level failure (DNS, TLS, reset, body read).
    #[error("{endpoint} request failed: {source}")]
    Transport {
        /// Endpoint label or path.
        endpoint: String,
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },

    /// Every attempt failed; wraps the final error.
    #[error("all {attempts} attempts exhausted for {endpoint}: {source}")]
    RetryExhausted {
        /// Endpoint label or path.
        endpoint: String,
        /// Number of attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        source: Box<GridError>,
    },

    /// Malformed caller input (bad date expression, unsupported market, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The response arrived but could not be decoded (JSON, CSV or zip).
    #[error("failed to decode response from {endpoint}: {message}")]
    Decode {
        /// Endpoint label or path.
        endpoint: String,
        /// Decoder message.
        message: String,
    },
}

impl GridError {
    /// Builds an [`GridError::InvalidInput`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Builds a [`GridError::Decode`].
    pub fn decode(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Decode {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Maps a `reqwest` error into `Timeout` or `Transport`.
    pub fn from_reqwest(endpoint: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout {
                endpoint: String::from(endpoint),
            }
        } else {
            Self::Transport {
                endpoint: String::from(endpoint),
                source,
            }
        }
    }

    /// Whether another attempt may succeed: network errors, timeouts,
    /// 429 and any 5xx.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. }
            | Self::Timeout { .. }
            | Self::RateLimited { .. }
            | Self::Api {
                status: 500..=599, ..
            } => true,
            _ => false,
        }
    }

    /// Whether the server rejected the bearer token (401/403).
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self, Self::Api { status: 401 | 403, .. })
    }

    /// Server-requested delay before the next attempt.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// HTTP status carried by this error, looking through `RetryExhausted`.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Authentication { status, .. } => *status,
            Self::RetryExhausted { source, .. } => source.status(),
            _ => None,
        }
    }
}
