//! Error taxonomy for the client.
//!
//! Mirrors the split used throughout `sqlx-core::error` (a closed enum with
//! constructor helpers like `Error::protocol(..)`/`Error::config(..)`),
//! generalized to the five-way taxonomy of the wire protocol this crate
//! speaks: configuration, row-builder/layout, invalid API-call ordering,
//! transport I/O, and server-rejected protocol versions.

use std::fmt;

/// Errors produced by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Raised synchronously while parsing a configuration string, building
    /// `Options`, or constructing a `Sender` from them.
    #[error("{0}")]
    Configuration(String),

    /// Raised synchronously by the row builder: bad name, bad value, buffer
    /// overflow past `max_buf_size`.
    #[error("{0}")]
    Layout(String),

    /// Raised when the row-builder state machine is called out of order
    /// (e.g. `symbol()` before `table()`).
    #[error("{0}")]
    InvalidApiCall(String),

    /// Transport-level I/O failure (socket reset, connect failure, etc).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// TLS handshake or certificate configuration failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// A non-retryable HTTP response, or a retryable one that exhausted the
    /// retry budget. Carries the last status and response body the server
    /// sent so the caller can inspect it.
    #[error("HTTP request failed with status {status}: {body}")]
    Http { status: u16, body: String },

    /// The HTTP client itself failed (DNS, connect, TLS via reqwest).
    #[error("HTTP transport error: {0}")]
    HttpTransport(String),

    /// Server-driven protocol-version negotiation failed.
    #[error("Unsupported protocol versions received from server: {0:?}")]
    ProtocolVersion(Vec<i64>),

    /// TCP challenge-response authentication was rejected or malformed.
    #[error("Authentication error: {0}")]
    Auth(String),
}

impl Error {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    pub(crate) fn layout(msg: impl Into<String>) -> Self {
        Error::Layout(msg.into())
    }

    pub(crate) fn invalid_api_call(msg: impl Into<String>) -> Self {
        Error::InvalidApiCall(msg.into())
    }

    pub(crate) fn tls(msg: impl fmt::Display) -> Self {
        Error::Tls(msg.to_string())
    }

    pub(crate) fn auth(msg: impl Into<String>) -> Self {
        Error::Auth(msg.into())
    }
}

/// `true` if an HTTP error of this kind should be retried.
pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(
        status,
        500 | 503 | 504 | 507 | 509 | 523 | 524 | 529 | 599
    )
}

pub(crate) type Result<T> = std::result::Result<T, Error>;
