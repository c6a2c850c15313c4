//! Error types for the fetch client.
//!
//! # Design
//! Construction-time violations (`BodyNotAllowed`, `UnsupportedBodyType`,
//! `InvalidHeaderName`, `InvalidRedirectStatus`) are returned directly from
//! the constructor that caused them. Read-time and transport-time failures
//! surface from the awaited read or `fetch` call. Nothing is retried here: a
//! consumed body cannot be replayed, so retrying means building a new
//! `Request`.
//!
//! `FetchError` is `Clone` because a failing stream must deliver the same
//! error to both branches of a tee.

use std::sync::Arc;

use thiserror::Error;

pub type Result<T, E = FetchError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The body was already read, streamed, or moved into another message.
    #[error("body has already been used")]
    AlreadyUsed,

    #[error("unsupported body type: {0}")]
    UnsupportedBodyType(&'static str),

    #[error("cannot read {actual} body as {expected}")]
    BodyTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("body not allowed for {method} requests")]
    BodyNotAllowed { method: String },

    #[error("invalid character in header field name: {0:?}")]
    InvalidHeaderName(String),

    #[error("invalid header value for {0:?}")]
    InvalidHeaderValue(String),

    #[error("invalid redirect status code: {0}")]
    InvalidRedirectStatus(u16),

    /// DNS, connection, protocol or timeout failure in the transport.
    #[error("network request failed: {0}")]
    Network(String),

    #[error("the operation was aborted")]
    Aborted,

    #[error("body stream cannot be cloned")]
    CloneUnsupported,

    #[error("capability unavailable: {0}")]
    CapabilityUnavailable(&'static str),

    #[error("invalid JSON body: {0}")]
    Json(Arc<serde_json::Error>),
}

impl FetchError {
    pub(crate) fn network(err: impl std::fmt::Display) -> Self {
        FetchError::Network(err.to_string())
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, FetchError::Aborted)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(e: std::io::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Json(Arc::new(e))
    }
}
