//! Incoming responses.
//!
//! Like [`Request`](crate::Request), a `Response` wraps a [`Body`] rather
//! than extending it. Transports build responses through `Response::new`,
//! the same path callers use, so every response body goes through the same
//! ingest rules.

use std::fmt;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::blob::Blob;
use crate::body::{Body, BodyInit};
use crate::capabilities::Capabilities;
use crate::error::{FetchError, Result};
use crate::form::FormData;
use crate::headers::Headers;
use crate::stream::BodyStream;

const REDIRECT_STATUSES: [u16; 5] = [301, 302, 303, 307, 308];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Default,
    Error,
}

impl ResponseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseType::Default => "default",
            ResponseType::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResponseInit {
    /// Defaults to 200.
    pub status: Option<u16>,
    /// Defaults to "OK".
    pub status_text: Option<String>,
    pub headers: Option<Headers>,
    pub url: Option<String>,
}

impl ResponseInit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn status_text(mut self, text: impl Into<String>) -> Self {
        self.status_text = Some(text.into());
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

pub struct Response {
    kind: ResponseType,
    status: u16,
    status_text: String,
    headers: Headers,
    url: String,
    body: Body,
    caps: Capabilities,
}

impl Response {
    pub fn new(body: impl Into<BodyInit>, init: ResponseInit) -> Result<Self> {
        Self::with_capabilities(body, init, *Capabilities::snapshot())
    }

    pub fn with_capabilities(body: impl Into<BodyInit>, init: ResponseInit, caps: Capabilities) -> Result<Self> {
        let mut headers = init.headers.unwrap_or_default();
        let body = Body::ingest(body, &mut headers, &caps)?;
        Ok(Self {
            kind: ResponseType::Default,
            status: init.status.unwrap_or(200),
            status_text: init.status_text.unwrap_or_else(|| "OK".to_string()),
            headers,
            url: init.url.unwrap_or_default(),
            body,
            caps,
        })
    }

    /// A network error response: status 0 and no body.
    pub fn error() -> Self {
        Self {
            kind: ResponseType::Error,
            status: 0,
            status_text: String::new(),
            headers: Headers::new(),
            url: String::new(),
            body: Body::empty(),
            caps: *Capabilities::snapshot(),
        }
    }

    /// An empty response pointing at `url` through `Location`.
    pub fn redirect(url: &str, status: u16) -> Result<Self> {
        if !REDIRECT_STATUSES.contains(&status) {
            return Err(FetchError::InvalidRedirectStatus(status));
        }
        let mut headers = Headers::new();
        headers.set("location", url)?;
        Self::new(
            BodyInit::Empty,
            ResponseInit {
                status: Some(status),
                status_text: Some(String::new()),
                headers: Some(headers),
                url: None,
            },
        )
    }

    /// An independent copy of the envelope. The body is shared for immutable
    /// inputs and split for streams, so both copies read the same bytes.
    pub fn try_clone(&mut self) -> Result<Response> {
        let init = self.body.clone_init()?;
        let mut headers = self.headers.clone();
        let body = Body::ingest(init, &mut headers, &self.caps)?;
        Ok(Response {
            kind: self.kind,
            status: self.status,
            status_text: self.status_text.clone(),
            headers,
            url: self.url.clone(),
            body,
            caps: self.caps,
        })
    }

    pub fn response_type(&self) -> ResponseType {
        self.kind
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// True for statuses in 200..=299.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn url(&self) -> &str {
        &self.url
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

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("type", &self.kind)
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn defaults() {
        let mut res = Response::new("hello", ResponseInit::new()).unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.status_text(), "OK");
        assert!(res.ok());
        assert_eq!(res.url(), "");
        assert_eq!(res.response_type(), ResponseType::Default);
        assert_eq!(res.headers().get("content-type"), Some("text/plain;charset=UTF-8"));
        assert_eq!(res.text().await.unwrap(), "hello");
    }

    #[test]
    fn ok_tracks_the_2xx_range() {
        for (status, ok) in [(199, false), (200, true), (204, true), (299, true), (300, false), (404, false)] {
            let res = Response::new(BodyInit::Empty, ResponseInit::new().status(status)).unwrap();
            assert_eq!(res.ok(), ok, "{status}");
        }
    }

    #[tokio::test]
    async fn error_response() {
        let mut res = Response::error();
        assert_eq!(res.status(), 0);
        assert_eq!(res.status_text(), "");
        assert!(!res.ok());
        assert_eq!(res.response_type(), ResponseType::Error);
        assert!(res.headers().is_empty());
        assert_eq!(res.text().await.unwrap(), "");
    }

    #[test]
    fn redirect_sets_location() {
        let res = Response::redirect("https://example.com/next", 307).unwrap();
        assert_eq!(res.status(), 307);
        assert_eq!(res.headers().get("Location"), Some("https://example.com/next"));
        assert!(res.body().is_empty());
    }

    #[test]
    fn redirect_rejects_other_statuses() {
        for status in [200, 300, 304, 404] {
            let err = Response::redirect("/x", status).unwrap_err();
            assert!(matches!(err, FetchError::InvalidRedirectStatus(s) if s == status));
        }
    }

    #[tokio::test]
    async fn clone_preserves_envelope_and_body() {
        let items: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(b"{\"a\"")), Ok(Bytes::from_static(b":1}"))];
        let headers = Headers::from_pairs([("content-type", "application/json"), ("x-trace", "7")]).unwrap();
        let mut res = Response::new(
            BodyStream::from_lazy_sequence(stream::iter(items)),
            ResponseInit::new()
                .status(201)
                .status_text("Created")
                .headers(headers)
                .url("https://x/items"),
        )
        .unwrap();
        let mut copy = res.try_clone().unwrap();
        assert_eq!(copy.status(), 201);
        assert_eq!(copy.status_text(), "Created");
        assert_eq!(copy.url(), "https://x/items");
        assert_eq!(copy.headers().get("x-trace"), Some("7"));

        let a: serde_json::Value = res.json().await.unwrap();
        let b: serde_json::Value = copy.json().await.unwrap();
        assert_eq!(a, b);
        assert!(res.body_used());
    }

    #[test]
    fn clone_of_error_keeps_type() {
        let mut res = Response::error();
        assert_eq!(res.try_clone().unwrap().response_type(), ResponseType::Error);
    }

    #[tokio::test]
    async fn clone_after_read_fails() {
        let mut res = Response::new("x", ResponseInit::new()).unwrap();
        res.text().await.unwrap();
        assert!(matches!(res.try_clone(), Err(FetchError::AlreadyUsed)));
    }
}
