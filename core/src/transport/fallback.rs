//! Transport over a legacy, event-driven HTTP engine.
//!
//! # Design
//! The engine runs an exchange on its own and reports progress as
//! [`EngineEvent`]s over a channel. This module turns that event stream into
//! a `Response` with an explicit state machine:
//!
//! ```text
//! Idle -> Opened -> HeadersReceived -> Loading -> Done
//!                                   \-> Error | TimedOut | Aborted
//! ```
//!
//! `fetch` resolves at `HeadersReceived`. From there a spawned driver keeps
//! consuming events: in incremental mode it forwards chunks into the response
//! stream as they arrive, otherwise it buffers and settles a pending body at
//! `Done`. An abort listener on the request signal cancels the engine and is
//! removed again when the exchange reaches a terminal state.
//!
//! Both channels are bounded. A reader that falls behind stalls the driver,
//! which in turn stalls the engine, so an unread body never piles up in
//! memory. Dropping the response cancels the engine in either mode.

use std::io::Read;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};
use ureq::ResponseExt;

use crate::body::{BodyInit, Payload};
use crate::capabilities::TransportCapabilities;
use crate::config::ClientConfig;
use crate::error::{FetchError, Result};
use crate::form::URLENCODED_MEDIA_TYPE;
use crate::headers::Headers;
use crate::http::{EngineEvent, ResponseHead, ResponseMode, WireRequest};
use crate::request::{Credentials, Request};
use crate::response::{Response, ResponseInit};
use crate::signal::{AbortSignal, ListenerId};
use crate::stream::{BodyStream, ProgressCallback};
use crate::transport::Transport;

/// Capacity of the engine event channel and of the incremental chunk
/// channel.
pub const EVENT_BUFFER: usize = 16;

/// An HTTP engine that reports through events instead of returning values.
///
/// `open` must not block. Sends wait for channel capacity. The engine stops
/// once `cancel` is set, and ends every exchange with one terminal event
/// unless the receiver is gone.
pub trait LegacyEngine: Send + Sync {
    fn open(
        &self,
        request: WireRequest,
        mode: ResponseMode,
        cancel: AbortSignal,
        events: mpsc::Sender<EngineEvent>,
    );
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Opened,
    HeadersReceived,
    Loading,
    Done,
    Error,
    TimedOut,
    Aborted,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExchangeState::Done | ExchangeState::Error | ExchangeState::TimedOut | ExchangeState::Aborted
        )
    }
}

pub struct FallbackTransport {
    engine: Arc<dyn LegacyEngine>,
    caps: TransportCapabilities,
    timeout: Option<std::time::Duration>,
    chunk_size: usize,
}

impl FallbackTransport {
    pub fn new(config: &ClientConfig, caps: TransportCapabilities) -> Self {
        Self::with_engine(Arc::new(UreqEngine::new(config)), config, caps)
    }

    pub fn with_engine(engine: Arc<dyn LegacyEngine>, config: &ClientConfig, caps: TransportCapabilities) -> Self {
        Self {
            engine,
            caps,
            timeout: config.timeout,
            chunk_size: config.chunk_size,
        }
    }

    /// Incremental delivery needs both the engine feature and stream bodies.
    fn mode(&self, request: &Request) -> ResponseMode {
        if self.caps.fallback_incremental && request.capabilities().stream {
            ResponseMode::Incremental
        } else {
            ResponseMode::Buffered
        }
    }

    async fn execute(&self, mut request: Request) -> Result<Response> {
        let signal = request.signal().clone();
        if signal.is_aborted() {
            debug!(url = %request.url(), "signal already set, not opening");
            return Err(FetchError::Aborted);
        }

        let is_form = request.body().is_form();
        let payload = tokio::select! {
            biased;
            _ = signal.aborted() => return Err(FetchError::Aborted),
            payload = request.body_mut().take_payload(false) => payload?,
        };
        let body = match payload {
            Payload::None => None,
            Payload::Bytes(bytes) => Some(bytes),
            Payload::Stream(stream) => Some(stream.read_all_chunks().await?),
        };
        if is_form && !request.headers().has("content-type") {
            request.headers_mut().set("content-type", URLENCODED_MEDIA_TYPE)?;
        }

        let wire = WireRequest {
            method: request.method().to_string(),
            url: request.url().to_string(),
            headers: request
                .headers()
                .entries()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            body,
            with_credentials: request.credentials() == Credentials::Include,
            timeout: self.timeout,
            chunk_size: self.chunk_size,
        };
        let mode = self.mode(&request);

        let cancel = AbortSignal::new();
        let listener = signal.add_listener({
            let cancel = cancel.clone();
            move || {
                cancel.set();
            }
        });
        let mut exchange = Exchange {
            state: ExchangeState::Idle,
            url: wire.url.clone(),
            signal,
            listener: Some(listener),
            cancel: cancel.clone(),
        };
        let (tx, mut events) = mpsc::channel(EVENT_BUFFER);
        self.engine.open(wire, mode, cancel, tx);
        exchange.advance(ExchangeState::Opened);

        let head = match exchange.next(&mut events).await {
            EngineEvent::HeadersReceived(head) => head,
            other => return Err(exchange.fail(other)),
        };
        exchange.advance(ExchangeState::HeadersReceived);

        let ResponseHead {
            status,
            status_text,
            raw_headers,
            url,
        } = head;
        let headers = Headers::parse_raw(&raw_headers);
        let url = url
            .filter(|u| !u.is_empty())
            .or_else(|| headers.get("x-request-url").map(str::to_string))
            .unwrap_or_default();
        let total = headers
            .get("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok());
        let progress = request.on_progress();

        let body = match mode {
            ResponseMode::Incremental => {
                let (chunks, rx) = mpsc::channel(EVENT_BUFFER);
                tokio::spawn(stream_body(exchange, events, chunks));
                let mut stream = BodyStream::from_receiver(rx);
                if let Some(callback) = progress {
                    stream = stream.with_progress(total, callback);
                }
                BodyInit::Stream(stream)
            }
            ResponseMode::Buffered => {
                let (done, rx) = oneshot::channel();
                tokio::spawn(buffer_body(exchange, events, progress, done));
                BodyInit::pending(async move {
                    rx.await
                        .unwrap_or_else(|_| Err(FetchError::Network("exchange ended without a body".into())))
                        .map(BodyInit::Bytes)
                })
            }
        };

        Response::with_capabilities(
            body,
            ResponseInit {
                status: Some(status),
                status_text: Some(status_text),
                headers: Some(headers),
                url: Some(url),
            },
            *request.capabilities(),
        )
    }
}

impl Transport for FallbackTransport {
    fn name(&self) -> &'static str {
        "fallback"
    }

    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(self.execute(request))
    }
}

/// One exchange's state, plus the abort listener it must release.
struct Exchange {
    state: ExchangeState,
    url: String,
    signal: AbortSignal,
    listener: Option<ListenerId>,
    cancel: AbortSignal,
}

impl Exchange {
    fn advance(&mut self, next: ExchangeState) {
        trace!(url = %self.url, from = ?self.state, to = ?next, "exchange state");
        self.state = next;
        if next.is_terminal() {
            if let Some(id) = self.listener.take() {
                self.signal.remove_listener(id);
            }
        }
    }

    /// The next engine event. A set cancel flag wins over queued events.
    async fn next(&self, events: &mut mpsc::Receiver<EngineEvent>) -> EngineEvent {
        tokio::select! {
            biased;
            _ = self.cancel.aborted() => EngineEvent::Abort,
            event = events.recv() => event
                .unwrap_or_else(|| EngineEvent::Error("engine closed the exchange".to_string())),
        }
    }

    /// End the exchange on a non-success event.
    fn fail(&mut self, event: EngineEvent) -> FetchError {
        let (state, err) = match event {
            EngineEvent::Abort => (ExchangeState::Aborted, FetchError::Aborted),
            EngineEvent::Timeout => (
                ExchangeState::TimedOut,
                FetchError::Network("request timed out".to_string()),
            ),
            EngineEvent::Error(message) => (ExchangeState::Error, FetchError::Network(message)),
            other => (
                ExchangeState::Error,
                FetchError::Network(format!("unexpected engine event in state {:?}: {other:?}", self.state)),
            ),
        };
        self.cancel.set();
        match state {
            ExchangeState::Aborted => debug!(url = %self.url, "exchange aborted"),
            _ => warn!(url = %self.url, error = %err, "exchange failed"),
        }
        self.advance(state);
        err
    }
}

async fn stream_body(
    mut exchange: Exchange,
    mut events: mpsc::Receiver<EngineEvent>,
    chunks: mpsc::Sender<Result<Bytes>>,
) {
    loop {
        match exchange.next(&mut events).await {
            EngineEvent::Chunk(chunk) => {
                exchange.advance(ExchangeState::Loading);
                // Waits for the reader; an abort meanwhile still ends the body.
                let sent = tokio::select! {
                    biased;
                    _ = exchange.cancel.aborted() => None,
                    sent = chunks.send(Ok(chunk)) => Some(sent.is_ok()),
                };
                match sent {
                    Some(true) => {}
                    Some(false) => {
                        debug!(url = %exchange.url, "response stream dropped, cancelling");
                        exchange.cancel.set();
                        exchange.advance(ExchangeState::Aborted);
                        return;
                    }
                    None => {
                        let err = exchange.fail(EngineEvent::Abort);
                        drop(events);
                        let _ = chunks.send(Err(err)).await;
                        return;
                    }
                }
            }
            EngineEvent::Load(rest) => {
                if !rest.is_empty() {
                    let _ = chunks.send(Ok(rest)).await;
                }
                exchange.advance(ExchangeState::Done);
                return;
            }
            EngineEvent::HeadersReceived(_) => debug!(url = %exchange.url, "ignoring repeated response head"),
            other => {
                let err = exchange.fail(other);
                drop(events);
                let _ = chunks.send(Err(err)).await;
                return;
            }
        }
    }
}

async fn buffer_body(
    mut exchange: Exchange,
    mut events: mpsc::Receiver<EngineEvent>,
    progress: Option<ProgressCallback>,
    mut done: oneshot::Sender<Result<Bytes>>,
) {
    let mut buf = BytesMut::new();
    let result = loop {
        let event = tokio::select! {
            biased;
            _ = done.closed() => None,
            event = exchange.next(&mut events) => Some(event),
        };
        let Some(event) = event else {
            debug!(url = %exchange.url, "response dropped before load, cancelling");
            exchange.cancel.set();
            exchange.advance(ExchangeState::Aborted);
            return;
        };
        match event {
            EngineEvent::Chunk(chunk) => {
                exchange.advance(ExchangeState::Loading);
                buf.extend_from_slice(&chunk);
            }
            EngineEvent::Load(rest) => {
                buf.extend_from_slice(&rest);
                exchange.advance(ExchangeState::Done);
                break Ok(buf.freeze());
            }
            EngineEvent::HeadersReceived(_) => {}
            other => break Err(exchange.fail(other)),
        }
    };
    if let (Ok(body), Some(callback)) = (&result, progress) {
        let loaded = body.len() as u64;
        callback(loaded, Some(loaded));
    }
    let _ = done.send(result);
}

/// The production engine: blocking `ureq` calls on tokio's blocking pool.
pub struct UreqEngine {
    agent: ureq::Agent,
}

impl UreqEngine {
    pub fn new(config: &ClientConfig) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .allow_non_standard_methods(true)
            .user_agent(config.user_agent.as_str())
            .timeout_global(config.timeout)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl LegacyEngine for UreqEngine {
    fn open(
        &self,
        request: WireRequest,
        mode: ResponseMode,
        cancel: AbortSignal,
        events: mpsc::Sender<EngineEvent>,
    ) {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || {
            let last = match transfer(&agent, request, mode, &cancel, &events) {
                Ok(event) => event,
                Err(ureq::Error::Timeout(_)) => EngineEvent::Timeout,
                Err(ureq::Error::Io(e)) if e.kind() == std::io::ErrorKind::TimedOut => EngineEvent::Timeout,
                Err(e) => EngineEvent::Error(e.to_string()),
            };
            let _ = events.blocking_send(last);
        });
    }
}

fn transfer(
    agent: &ureq::Agent,
    request: WireRequest,
    mode: ResponseMode,
    cancel: &AbortSignal,
    events: &mpsc::Sender<EngineEvent>,
) -> std::result::Result<EngineEvent, ureq::Error> {
    if cancel.is_aborted() {
        return Ok(EngineEvent::Abort);
    }
    // No cookie store is configured, so there are no ambient credentials to
    // attach or withhold.
    trace!(url = %request.url, with_credentials = request.with_credentials, "ureq exchange");

    let mut builder = ureq::http::Request::builder()
        .method(request.method.as_str())
        .uri(request.url.as_str());
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    let response = match request.body {
        Some(body) => agent.run(builder.body(body.to_vec())?)?,
        None => agent.run(builder.body(())?)?,
    };

    let status = response.status();
    let url = response.get_uri().to_string();
    let mut raw_headers = String::new();
    for (name, value) in response.headers() {
        raw_headers.push_str(name.as_str());
        raw_headers.push_str(": ");
        raw_headers.push_str(&String::from_utf8_lossy(value.as_bytes()));
        raw_headers.push_str("\r\n");
    }
    let head = ResponseHead {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        raw_headers,
        url: Some(url),
    };
    if events.blocking_send(EngineEvent::HeadersReceived(head)).is_err() {
        return Ok(EngineEvent::Abort);
    }

    let mut reader = response.into_body().into_reader();
    let mut buf = vec![0u8; request.chunk_size.max(1)];
    let mut whole = BytesMut::new();
    loop {
        if cancel.is_aborted() {
            return Ok(EngineEvent::Abort);
        }
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = Bytes::copy_from_slice(&buf[..n]);
        match mode {
            ResponseMode::Incremental => {
                if events.blocking_send(EngineEvent::Chunk(chunk)).is_err() {
                    return Ok(EngineEvent::Abort);
                }
            }
            ResponseMode::Buffered => whole.extend_from_slice(&chunk),
        }
    }
    Ok(EngineEvent::Load(whole.freeze()))
}
