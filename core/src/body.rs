//! Message bodies with one-shot consumption.
//!
//! # Design
//! A `Body` holds the representation it was built from (`BodyInit`) and
//! converts lazily when read. Every consuming read takes the representation
//! out and flips the shared `used` flag with a single `swap`, so the first
//! reader wins and every later read fails with `AlreadyUsed`.
//!
//! `stream()` is the exception: it hands out a stream instrumented to flip
//! `used` on its first pull or cancel, so a stream that is obtained but never
//! touched leaves `body_used()` false. The body no longer owns that stream,
//! so any other read still fails.
//!
//! Non-stream representations are immutable and cheap to share, which is all
//! `clone_init` needs for them. Streams are split with a tee; a pending body
//! is turned into a single-pull stream first and then split.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::blob::{decode_utf8, Blob};
use crate::capabilities::Capabilities;
use crate::error::{FetchError, Result};
use crate::form::{FormData, SearchParams, URLENCODED_MEDIA_TYPE};
use crate::headers::Headers;
use crate::stream::BodyStream;

pub const TEXT_MEDIA_TYPE: &str = "text/plain;charset=UTF-8";

/// A body input that is not available yet.
pub type PendingBody = Pin<Box<dyn Future<Output = Result<BodyInit>> + Send>>;

/// Every representation a body can be built from.
pub enum BodyInit {
    Empty,
    Text(String),
    Bytes(Bytes),
    Blob(Blob),
    Form(FormData),
    SearchParams(SearchParams),
    Stream(BodyStream),
    Pending(PendingBody),
}

impl BodyInit {
    pub fn pending(fut: impl Future<Output = Result<BodyInit>> + Send + 'static) -> Self {
        BodyInit::Pending(Box::pin(fut))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BodyInit::Empty)
    }

    fn kind(&self) -> &'static str {
        match self {
            BodyInit::Empty => "empty",
            BodyInit::Text(_) => "text",
            BodyInit::Bytes(_) => "bytes",
            BodyInit::Blob(_) => "blob",
            BodyInit::Form(_) => "form data",
            BodyInit::SearchParams(_) => "search params",
            BodyInit::Stream(_) => "stream",
            BodyInit::Pending(_) => "pending",
        }
    }

    /// A copy for the immutable representations; `None` for streams and
    /// pending bodies.
    fn share(&self) -> Option<BodyInit> {
        Some(match self {
            BodyInit::Empty => BodyInit::Empty,
            BodyInit::Text(s) => BodyInit::Text(s.clone()),
            BodyInit::Bytes(b) => BodyInit::Bytes(b.clone()),
            BodyInit::Blob(b) => BodyInit::Blob(b.clone()),
            BodyInit::Form(f) => BodyInit::Form(f.clone()),
            BodyInit::SearchParams(p) => BodyInit::SearchParams(p.clone()),
            BodyInit::Stream(_) | BodyInit::Pending(_) => return None,
        })
    }
}

impl fmt::Debug for BodyInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BodyInit::{}", self.kind())
    }
}

impl From<&str> for BodyInit {
    fn from(s: &str) -> Self {
        BodyInit::Text(s.to_string())
    }
}

impl From<String> for BodyInit {
    fn from(s: String) -> Self {
        BodyInit::Text(s)
    }
}

impl From<Bytes> for BodyInit {
    fn from(b: Bytes) -> Self {
        BodyInit::Bytes(b)
    }
}

impl From<Vec<u8>> for BodyInit {
    fn from(b: Vec<u8>) -> Self {
        BodyInit::Bytes(Bytes::from(b))
    }
}

impl From<&'static [u8]> for BodyInit {
    fn from(b: &'static [u8]) -> Self {
        BodyInit::Bytes(Bytes::from_static(b))
    }
}

impl From<Blob> for BodyInit {
    fn from(b: Blob) -> Self {
        BodyInit::Blob(b)
    }
}

impl From<FormData> for BodyInit {
    fn from(f: FormData) -> Self {
        BodyInit::Form(f)
    }
}

impl From<SearchParams> for BodyInit {
    fn from(p: SearchParams) -> Self {
        BodyInit::SearchParams(p)
    }
}

impl From<BodyStream> for BodyInit {
    fn from(s: BodyStream) -> Self {
        BodyInit::Stream(s)
    }
}

impl<T: Into<BodyInit>> From<Option<T>> for BodyInit {
    fn from(v: Option<T>) -> Self {
        v.map_or(BodyInit::Empty, Into::into)
    }
}

/// What a transport puts on the wire.
pub(crate) enum Payload {
    None,
    Bytes(Bytes),
    Stream(BodyStream),
}

pub struct Body {
    init: Option<BodyInit>,
    used: Arc<AtomicBool>,
    media_type: Option<String>,
    blob_supported: bool,
    stream_supported: bool,
}

impl Body {
    /// Build a body, inferring the media type into `headers` when absent.
    pub fn ingest(init: impl Into<BodyInit>, headers: &mut Headers, caps: &Capabilities) -> Result<Self> {
        let init = init.into();
        match &init {
            BodyInit::Blob(_) if !caps.blob => return Err(FetchError::UnsupportedBodyType("blob")),
            BodyInit::Form(_) if !caps.form_data => {
                return Err(FetchError::UnsupportedBodyType("form data"))
            }
            BodyInit::SearchParams(_) if !caps.search_params => {
                return Err(FetchError::UnsupportedBodyType("search params"))
            }
            BodyInit::Stream(_) if !caps.stream => {
                return Err(FetchError::UnsupportedBodyType("stream"))
            }
            _ => {}
        }

        if !headers.has("content-type") {
            let inferred = match &init {
                BodyInit::Text(_) => Some(TEXT_MEDIA_TYPE),
                BodyInit::Blob(b) if !b.media_type().is_empty() => Some(b.media_type()),
                BodyInit::SearchParams(_) => Some(URLENCODED_MEDIA_TYPE),
                _ => None,
            };
            if let Some(media_type) = inferred {
                headers.set("content-type", media_type)?;
            }
        }

        let used = Arc::new(AtomicBool::new(false));
        let init = match init {
            BodyInit::SearchParams(p) => BodyInit::Text(p.to_string()),
            BodyInit::Stream(s) => BodyInit::Stream(instrument(s, &used)),
            other => other,
        };

        Ok(Self {
            init: Some(init),
            used,
            media_type: headers.content_type().map(str::to_string),
            blob_supported: caps.blob,
            stream_supported: caps.stream,
        })
    }

    /// An absent body.
    pub fn empty() -> Self {
        Self {
            init: Some(BodyInit::Empty),
            used: Arc::new(AtomicBool::new(false)),
            media_type: None,
            blob_supported: true,
            stream_supported: true,
        }
    }

    pub fn body_used(&self) -> bool {
        self.used.load(Ordering::Acquire)
    }

    pub fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.init, Some(BodyInit::Empty))
    }

    pub(crate) fn is_form(&self) -> bool {
        matches!(self.init, Some(BodyInit::Form(_)))
    }

    pub async fn text(&mut self) -> Result<String> {
        match settle(self.consume()?).await? {
            BodyInit::Text(s) => Ok(s),
            init @ BodyInit::Form(_) => Err(mismatch("text", &init)),
            init => Ok(decode_utf8(&to_bytes(init).await?)),
        }
    }

    pub async fn bytes(&mut self) -> Result<Bytes> {
        to_bytes(self.consume()?).await
    }

    pub async fn binary(&mut self) -> Result<Blob> {
        if !self.blob_supported {
            return Err(FetchError::CapabilityUnavailable("blob"));
        }
        let media_type = self.media_type.clone().unwrap_or_default();
        match settle(self.consume()?).await? {
            BodyInit::Blob(b) => Ok(b),
            init @ BodyInit::Form(_) => Err(mismatch("blob", &init)),
            init => Ok(Blob::from_bytes(to_bytes(init).await?, &media_type)),
        }
    }

    pub async fn structured_form(&mut self) -> Result<FormData> {
        match settle(self.consume()?).await? {
            BodyInit::Text(s) => Ok(FormData::decode(&s)),
            BodyInit::Form(f) => Ok(f),
            BodyInit::SearchParams(p) => Ok(p.iter().collect()),
            init => Ok(FormData::decode(&decode_utf8(&to_bytes(init).await?))),
        }
    }

    pub async fn json<T: DeserializeOwned>(&mut self) -> Result<T> {
        let text = self.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Hand out the body as a stream. The body counts as used from the
    /// stream's first pull or cancel.
    pub fn stream(&mut self) -> Result<BodyStream> {
        if self.body_used() {
            return Err(FetchError::AlreadyUsed);
        }
        let init = self.init.take().ok_or(FetchError::AlreadyUsed)?;
        Ok(match init {
            BodyInit::Stream(s) => s,
            BodyInit::Empty => instrument(BodyStream::empty(), &self.used),
            other => instrument(BodyStream::from_future(move || to_bytes(other), None), &self.used),
        })
    }

    /// A second input equivalent to this body, leaving this body readable.
    pub fn clone_init(&mut self) -> Result<BodyInit> {
        if self.body_used() {
            return Err(FetchError::AlreadyUsed);
        }
        let init = self.init.take().ok_or(FetchError::AlreadyUsed)?;
        if let Some(copy) = init.share() {
            self.init = Some(init);
            return Ok(copy);
        }
        if !self.stream_supported {
            self.init = Some(init);
            return Err(FetchError::CloneUnsupported);
        }
        let stream = match init {
            BodyInit::Stream(s) => s,
            pending => instrument(BodyStream::from_future(move || to_bytes(pending), None), &self.used),
        };
        let (kept, copy) = stream.tee();
        self.init = Some(BodyInit::Stream(kept));
        Ok(BodyInit::Stream(copy))
    }

    /// Take the input for another message without reading it.
    pub(crate) fn take_init(&mut self) -> Result<BodyInit> {
        self.consume()
    }

    /// Take what a transport should send. An empty body is left in place
    /// and does not count as used.
    pub(crate) async fn take_payload(&mut self, allow_stream: bool) -> Result<Payload> {
        if self.is_empty() {
            return Ok(Payload::None);
        }
        Ok(match settle(self.consume()?).await? {
            BodyInit::Empty => Payload::None,
            BodyInit::Form(f) => Payload::Bytes(Bytes::from(f.encode())),
            BodyInit::Stream(s) if allow_stream => Payload::Stream(s),
            init => Payload::Bytes(to_bytes(init).await?),
        })
    }

    fn consume(&mut self) -> Result<BodyInit> {
        if self.used.swap(true, Ordering::AcqRel) {
            return Err(FetchError::AlreadyUsed);
        }
        self.init.take().ok_or(FetchError::AlreadyUsed)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("init", &self.init)
            .field("used", &self.body_used())
            .field("media_type", &self.media_type)
            .finish()
    }
}

fn instrument(stream: BodyStream, used: &Arc<AtomicBool>) -> BodyStream {
    let used = used.clone();
    BodyStream::instrumented(stream, move || used.store(true, Ordering::Release))
}

fn mismatch(expected: &'static str, init: &BodyInit) -> FetchError {
    FetchError::BodyTypeMismatch {
        expected,
        actual: init.kind(),
    }
}

/// Resolve pending inputs until a concrete representation remains.
async fn settle(mut init: BodyInit) -> Result<BodyInit> {
    while let BodyInit::Pending(fut) = init {
        init = fut.await?;
    }
    Ok(init)
}

async fn to_bytes(init: BodyInit) -> Result<Bytes> {
    match settle(init).await? {
        BodyInit::Empty => Ok(Bytes::new()),
        BodyInit::Text(s) => Ok(Bytes::from(s)),
        BodyInit::Bytes(b) => Ok(b),
        BodyInit::Blob(b) => Ok(b.bytes()),
        BodyInit::SearchParams(p) => Ok(Bytes::from(p.to_string())),
        BodyInit::Stream(s) => s.read_all_chunks().await,
        init @ (BodyInit::Form(_) | BodyInit::Pending(_)) => Err(mismatch("bytes", &init)),
    }
}
