//! A fetch-style HTTP client with one-shot bodies and pluggable transports.
//!
//! # Overview
//! Callers build a [`Request`] (or just pass a URL) and await [`fetch`], which
//! resolves with a [`Response`] as soon as the response head is known. Both
//! messages carry a [`Body`] that can be read exactly once: as text, bytes, a
//! [`Blob`], a structured [`FormData`], JSON, or a [`BodyStream`].
//!
//! # Design
//! - Messages hold a body rather than extending it; the headers are resolved
//!   before the body so inferred content types are written back in one step.
//! - A [`Capabilities`] snapshot is computed once per process and passed
//!   explicitly everywhere else. Tests construct degraded snapshots directly.
//! - Two transports sit behind the [`Transport`] trait. The native one drives
//!   `reqwest`; the fallback one is an explicit state machine over events from
//!   a [`LegacyEngine`], backed by `ureq` in production. The choice is made
//!   once per [`Client`].
//! - Cancellation goes through [`AbortController`] / [`AbortSignal`]. A set
//!   signal rejects a pending `fetch` and every pending body read with
//!   [`FetchError::Aborted`].

pub mod blob;
pub mod body;
pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
pub mod form;
pub mod headers;
pub mod http;
pub mod request;
pub mod response;
pub mod signal;
pub mod stream;
pub mod transport;

pub use blob::{Blob, BlobPart};
pub use body::{Body, BodyInit};
pub use capabilities::{Capabilities, TransportCapabilities};
pub use client::{Client, FetchInput};
pub use config::{ClientConfig, TransportPreference};
pub use error::{FetchError, Result};
pub use form::{FormData, SearchParams};
pub use headers::Headers;
pub use http::{EngineEvent, ResponseHead, ResponseMode, WireRequest};
pub use request::{Credentials, Request, RequestInit, RequestMode};
pub use response::{Response, ResponseInit, ResponseType};
pub use signal::{AbortController, AbortSignal, ListenerId, Unfollow};
pub use stream::{BodyStream, ProgressCallback};
pub use transport::{
    ExchangeState, FallbackTransport, LegacyEngine, NativeTransport, Transport, TransportChoice,
    TransportSelector, UreqEngine,
};

/// Fetch `input` with the process-wide [`Client`].
///
/// ```no_run
/// # async fn run() -> fetch_core::Result<()> {
/// let mut response = fetch_core::fetch("https://example.com/data.json", Default::default()).await?;
/// let value: serde_json::Value = response.json().await?;
/// # Ok(())
/// # }
/// ```
pub async fn fetch(input: impl Into<FetchInput>, init: RequestInit) -> Result<Response> {
    Client::shared().fetch(input, init).await
}
