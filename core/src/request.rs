//! Outgoing requests.
//!
//! # Design
//! A `Request` is an envelope around a [`Body`]; it does not extend it. The
//! headers are resolved first and handed to `Body::ingest`, which may add a
//! `content-type`, so the envelope never observes a half-built body.
//!
//! Building a request from another request moves the source's unread body
//! into the new one and leaves the source marked as used. `try_clone` avoids
//! that by passing an explicit copy of the body.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::blob::Blob;
use crate::body::{Body, BodyInit};
use crate::capabilities::Capabilities;
use crate::error::{FetchError, Result};
use crate::form::FormData;
use crate::headers::Headers;
use crate::signal::AbortSignal;
use crate::stream::{BodyStream, ProgressCallback};

/// Methods whose spelling is upper-cased; anything else is kept verbatim.
const NORMALIZED_METHODS: [&str; 8] = [
    "CONNECT", "DELETE", "GET", "HEAD", "OPTIONS", "POST", "PUT", "TRACE",
];

pub fn normalize_method(method: &str) -> String {
    let upper = method.to_ascii_uppercase();
    if NORMALIZED_METHODS.contains(&upper.as_str()) {
        upper
    } else {
        method.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

impl Credentials {
    pub fn as_str(&self) -> &'static str {
        match self {
            Credentials::Omit => "omit",
            Credentials::SameOrigin => "same-origin",
            Credentials::Include => "include",
        }
    }
}

impl FromStr for Credentials {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "omit" => Ok(Credentials::Omit),
            "same-origin" => Ok(Credentials::SameOrigin),
            "include" => Ok(Credentials::Include),
            other => Err(format!("unknown credentials mode {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
}

impl RequestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMode::Cors => "cors",
            RequestMode::NoCors => "no-cors",
            RequestMode::SameOrigin => "same-origin",
        }
    }
}

impl FromStr for RequestMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cors" => Ok(RequestMode::Cors),
            "no-cors" => Ok(RequestMode::NoCors),
            "same-origin" => Ok(RequestMode::SameOrigin),
            other => Err(format!("unknown request mode {other:?}")),
        }
    }
}

/// Options for building a request. Every field left `None` keeps the value
/// copied from the source request, or the default.
#[derive(Default)]
pub struct RequestInit {
    pub body: Option<BodyInit>,
    pub credentials: Option<Credentials>,
    pub headers: Option<Headers>,
    pub method: Option<String>,
    pub mode: Option<RequestMode>,
    pub referrer: Option<String>,
    pub signal: Option<AbortSignal>,
    pub on_progress: Option<ProgressCallback>,
}

impl RequestInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn body(mut self, body: impl Into<BodyInit>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn mode(mut self, mode: RequestMode) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }

    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn on_progress(mut self, callback: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(std::sync::Arc::new(callback));
        self
    }

    fn has_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| !b.is_empty())
    }
}

pub struct Request {
    url: String,
    method: String,
    headers: Headers,
    credentials: Credentials,
    mode: RequestMode,
    referrer: Option<String>,
    signal: AbortSignal,
    on_progress: Option<ProgressCallback>,
    body: Body,
    caps: Capabilities,
}

impl Request {
    pub fn new(url: impl Into<String>, init: RequestInit) -> Result<Self> {
        Self::with_capabilities(url, init, *Capabilities::snapshot())
    }

    pub fn with_capabilities(url: impl Into<String>, init: RequestInit, caps: Capabilities) -> Result<Self> {
        let method = normalize_method(init.method.as_deref().unwrap_or("GET"));
        check_body_allowed(&method, init.has_body())?;
        let mut headers = init.headers.unwrap_or_default();
        let body = Body::ingest(init.body.unwrap_or(BodyInit::Empty), &mut headers, &caps)?;
        Ok(Self {
            url: url.into(),
            method,
            headers,
            credentials: init.credentials.unwrap_or_default(),
            mode: init.mode.unwrap_or_default(),
            referrer: init.referrer,
            signal: init.signal.unwrap_or_default(),
            on_progress: init.on_progress,
            body,
            caps,
        })
    }

    /// Build a request from `source`. Without an explicit body in `init`,
    /// the source's body moves over and the source counts as used.
    pub fn from_request(source: &mut Request, init: RequestInit) -> Result<Self> {
        if source.body_used() {
            return Err(FetchError::AlreadyUsed);
        }
        let method = normalize_method(init.method.as_deref().unwrap_or(&source.method));
        let inherits_body = !init.has_body() && !source.body.is_empty();
        check_body_allowed(&method, init.has_body() || inherits_body)?;

        let body = match init.body {
            Some(body) if !body.is_empty() => body,
            _ if inherits_body => source.body.take_init()?,
            _ => BodyInit::Empty,
        };
        let mut headers = init.headers.unwrap_or_else(|| source.headers.clone());
        let caps = source.caps;
        let body = Body::ingest(body, &mut headers, &caps)?;
        Ok(Self {
            url: source.url.clone(),
            method,
            headers,
            credentials: init.credentials.unwrap_or(source.credentials),
            mode: init.mode.unwrap_or(source.mode),
            referrer: init.referrer.or_else(|| source.referrer.clone()),
            signal: init.signal.unwrap_or_else(|| source.signal.clone()),
            on_progress: init.on_progress.or_else(|| source.on_progress.clone()),
            body,
            caps,
        })
    }

    /// An independent copy whose body reads the same bytes.
    pub fn try_clone(&mut self) -> Result<Request> {
        let body = self.body.clone_init()?;
        Request::from_request(
            self,
            RequestInit {
                body: Some(body),
                ..RequestInit::default()
            },
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn credentials(&self) -> Credentials {
        self.credentials
    }

    pub fn mode(&self) -> RequestMode {
        self.mode
    }

    pub fn referrer(&self) -> Option<&str> {
        self.referrer.as_deref()
    }

    pub fn signal(&self) -> &AbortSignal {
        &self.signal
    }

    pub(crate) fn on_progress(&self) -> Option<ProgressCallback> {
        self.on_progress.clone()
    }

    pub(crate) fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut Body {
        &mut self.body
    }

    pub fn body_used(&self) -> bool {
        self.body.body_used()
    }

    pub async fn text(&mut self) -> Result<String> {
        self.body.text().await
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.body.json().await
    }

    pub async fn bytes(&mut self) -> Result<Bytes> {
        self.body.bytes().await
    }

    pub async fn binary(&mut self) -> Result<Blob> {
        self.body.binary().await
    }

    pub async fn structured_form(&mut self) -> Result<FormData> {
        self.body.structured_form().await
    }

    pub fn stream(&mut self) -> Result<BodyStream> {
        self.body.stream()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("credentials", &self.credentials)
            .field("mode", &self.mode)
            .field("body", &self.body)
            .finish()
    }
}

fn check_body_allowed(method: &str, has_body: bool) -> Result<()> {
    if has_body && (method == "GET" || method == "HEAD") {
        return Err(FetchError::BodyNotAllowed {
            method: method.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[test]
    fn method_is_normalized_for_canonical_tokens() {
        let req = Request::new("https://x", RequestInit::new().method("get")).unwrap();
        assert_eq!(req.method(), "GET");
        assert_eq!(normalize_method("patch"), "patch");
        assert_eq!(normalize_method("Trace"), "TRACE");
        assert_eq!(normalize_method("connect"), "CONNECT");
        assert_eq!(normalize_method("PROPFIND"), "PROPFIND");
    }

    #[test]
    fn defaults_for_bare_url() {
        let req = Request::new("https://example.com/a", RequestInit::new()).unwrap();
        assert_eq!(req.url(), "https://example.com/a");
        assert_eq!(req.method(), "GET");
        assert_eq!(req.credentials(), Credentials::SameOrigin);
        assert_eq!(req.mode(), RequestMode::Cors);
        assert!(req.referrer().is_none());
        assert!(!req.signal().is_aborted());
        assert!(req.body().is_empty());
    }

    #[test]
    fn body_not_allowed_for_get_and_head() {
        let err = Request::new("https://x", RequestInit::new().method("GET").body("x")).unwrap_err();
        assert!(matches!(err, FetchError::BodyNotAllowed { ref method } if method == "GET"));
        let err = Request::new("https://x", RequestInit::new().method("head").body("x")).unwrap_err();
        assert!(matches!(err, FetchError::BodyNotAllowed { .. }));
        assert!(Request::new("https://x", RequestInit::new().method("GET").body(BodyInit::Empty)).is_ok());
    }

    #[tokio::test]
    async fn post_body_sets_content_type() {
        let mut req = Request::new("https://x", RequestInit::new().method("post").body("hi")).unwrap();
        assert_eq!(req.headers().get("Content-Type"), Some("text/plain;charset=UTF-8"));
        assert_eq!(req.text().await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn from_request_moves_the_body() {
        let controller = crate::signal::AbortController::new();
        let mut source = Request::new(
            "https://x/upload",
            RequestInit::new()
                .method("PUT")
                .body("payload")
                .credentials(Credentials::Include)
                .mode(RequestMode::SameOrigin)
                .referrer("https://x/")
                .signal(controller.signal()),
        )
        .unwrap();
        let mut copy = Request::from_request(&mut source, RequestInit::new()).unwrap();
        assert!(source.body_used());
        assert_eq!(copy.url(), "https://x/upload");
        assert_eq!(copy.method(), "PUT");
        assert_eq!(copy.credentials(), Credentials::Include);
        assert_eq!(copy.mode(), RequestMode::SameOrigin);
        assert_eq!(copy.referrer(), Some("https://x/"));
        assert_eq!(copy.headers().get("content-type"), Some("text/plain;charset=UTF-8"));
        controller.abort();
        assert!(copy.signal().is_aborted());
        assert_eq!(copy.text().await.unwrap(), "payload");

        let err = Request::from_request(&mut source, RequestInit::new()).unwrap_err();
        assert!(matches!(err, FetchError::AlreadyUsed));
    }

    #[test]
    fn from_request_options_override() {
        let mut source = Request::new(
            "https://x",
            RequestInit::new().headers(Headers::from_pairs([("X-A", "1")]).unwrap()),
        )
        .unwrap();
        let copy = Request::from_request(
            &mut source,
            RequestInit::new()
                .method("delete")
                .headers(Headers::from_pairs([("X-B", "2")]).unwrap()),
        )
        .unwrap();
        assert_eq!(copy.method(), "DELETE");
        assert!(!copy.headers().has("x-a"));
        assert_eq!(copy.headers().get("x-b"), Some("2"));
        assert!(!source.body_used());
    }

    #[test]
    fn from_request_rejects_inherited_body_on_get() {
        let mut source = Request::new("https://x", RequestInit::new().method("POST").body("x")).unwrap();
        let err = Request::from_request(&mut source, RequestInit::new().method("GET")).unwrap_err();
        assert!(matches!(err, FetchError::BodyNotAllowed { .. }));
        assert!(!source.body_used());
    }

    #[tokio::test]
    async fn try_clone_reads_the_same_stream() {
        let items: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))];
        let mut req = Request::new(
            "https://x",
            RequestInit::new()
                .method("POST")
                .body(BodyStream::from_lazy_sequence(stream::iter(items))),
        )
        .unwrap();
        let mut copy = req.try_clone().unwrap();
        assert!(!req.body_used());
        assert_eq!(copy.bytes().await.unwrap(), "abcd");
        assert_eq!(req.bytes().await.unwrap(), "abcd");
        assert!(matches!(req.try_clone(), Err(FetchError::AlreadyUsed)));
    }

    #[test]
    fn parse_credentials_and_mode() {
        assert_eq!("include".parse::<Credentials>().unwrap(), Credentials::Include);
        assert_eq!("no-cors".parse::<RequestMode>().unwrap(), RequestMode::NoCors);
        assert!("everything".parse::<RequestMode>().is_err());
        assert_eq!(Credentials::Omit.as_str(), "omit");
    }
}
