//! Plain-data types exchanged with the legacy HTTP engine.
//!
//! # Design
//! The fallback transport never touches the network itself. It hands a
//! `WireRequest` to a [`LegacyEngine`](crate::transport::LegacyEngine) and
//! reacts to the `EngineEvent`s the engine sends back. Keeping both sides as
//! owned data lets the engine run on a blocking thread and lets tests script
//! an engine without any sockets.

use std::time::Duration;

use bytes::Bytes;

/// A request as the legacy engine sees it. Stream bodies are already
/// materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    /// Send ambient credentials (cookies, auth) along with the request.
    pub with_credentials: bool,
    pub timeout: Option<Duration>,
    pub chunk_size: usize,
}

/// How the engine delivers the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// One `Load` event carrying the whole body.
    Buffered,
    /// `Chunk` events as data arrives, then an empty `Load`.
    Incremental,
}

/// Status line and headers, reported once per exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub status_text: String,
    /// `name: value` lines separated by CRLF, as received.
    pub raw_headers: String,
    /// Final URL after redirects, when the engine knows it.
    pub url: Option<String>,
}

/// Progress of one exchange. An engine sends `HeadersReceived` first and
/// finishes with exactly one of `Load`, `Error`, `Timeout` or `Abort`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    HeadersReceived(ResponseHead),
    Chunk(Bytes),
    Load(Bytes),
    Error(String),
    Timeout,
    Abort,
}
