//! Transport over the platform's async HTTP client.

use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{Stream, TryStreamExt};
use reqwest::header::CONTENT_LENGTH;
use tracing::debug;

use crate::body::{BodyInit, Payload};
use crate::capabilities::TransportCapabilities;
use crate::config::ClientConfig;
use crate::error::{FetchError, Result};
use crate::form::URLENCODED_MEDIA_TYPE;
use crate::headers::Headers;
use crate::request::Request;
use crate::response::{Response, ResponseInit};
use crate::signal::{AbortController, AbortSignal, Unfollow};
use crate::stream::BodyStream;
use crate::transport::Transport;

pub struct NativeTransport {
    client: reqwest::Client,
    caps: TransportCapabilities,
}

impl NativeTransport {
    pub fn new(config: &ClientConfig, caps: TransportCapabilities) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.as_str());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(FetchError::network)?;
        Ok(Self { client, caps })
    }

    async fn execute(&self, mut request: Request) -> Result<Response> {
        if request.signal().is_aborted() {
            return Err(FetchError::Aborted);
        }
        // One controller per exchange, following the caller's signal until
        // the exchange fails or its body ends.
        let controller = AbortController::new();
        let exchange = controller.signal();
        let unfollow = AbortSignal::unfollow(request.signal(), exchange.follow(request.signal()));
        let url = request.url().to_string();

        tokio::select! {
            biased;
            _ = exchange.aborted() => {
                debug!(url = %url, "native exchange aborted");
                Err(FetchError::Aborted)
            }
            res = self.exchange(&mut request, controller.clone(), unfollow) => res,
        }
    }

    async fn exchange(
        &self,
        request: &mut Request,
        controller: AbortController,
        unfollow: Unfollow,
    ) -> Result<Response> {
        let method = reqwest::Method::from_bytes(request.method().as_bytes()).map_err(FetchError::network)?;
        let mut builder = self.client.request(method, request.url());

        let is_form = request.body().is_form();
        let payload = request
            .body_mut()
            .take_payload(self.caps.native_request_stream)
            .await?;
        if is_form && !request.headers().has("content-type") {
            request.headers_mut().set("content-type", URLENCODED_MEDIA_TYPE)?;
        }
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        builder = match payload {
            Payload::None => builder,
            Payload::Bytes(bytes) => builder.body(bytes),
            Payload::Stream(stream) => builder.body(reqwest::Body::wrap_stream(SyncBody(Mutex::new(stream)))),
        };

        let response = builder.send().await.map_err(map_error)?;
        let status = response.status();
        let total = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());
        let mut headers = Headers::new();
        for (name, value) in response.headers() {
            if let Err(e) = headers.append(name.as_str(), &String::from_utf8_lossy(value.as_bytes())) {
                debug!(error = %e, "skipping response header");
            }
        }
        let url = response.url().to_string();
        debug!(status = status.as_u16(), url = %url, "native response head");

        let signal = controller.signal();
        let mut stream = if self.caps.native_response_stream {
            BodyStream::from_lazy_sequence(response.bytes_stream().map_err(map_error))
        } else {
            whole_body(response, controller)
        }
        .abortable(signal)
        .holding(unfollow);
        if let Some(callback) = request.on_progress() {
            stream = stream.with_progress(total, callback);
        }

        Response::with_capabilities(
            BodyInit::Stream(stream),
            ResponseInit {
                status: Some(status.as_u16()),
                status_text: Some(status.canonical_reason().unwrap_or("").to_string()),
                headers: Some(headers),
                url: Some(url),
            },
            *request.capabilities(),
        )
    }
}

impl Transport for NativeTransport {
    fn name(&self) -> &'static str {
        "native"
    }

    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
        Box::pin(self.execute(request))
    }
}

/// Whole-buffer read, deferred until the body is pulled. Cancelling before
/// that aborts the exchange and releases the connection.
fn whole_body(response: reqwest::Response, controller: AbortController) -> BodyStream {
    BodyStream::from_future(
        move || async move { response.bytes().await.map_err(map_error) },
        Some(Box::new(move || {
            controller.abort();
        })),
    )
}

fn map_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Network(format!("request timed out: {err}"))
    } else {
        FetchError::network(err)
    }
}

/// Request bodies must be `Sync`; a body stream is only `Send`. Exclusive
/// access through `Pin<&mut Self>` makes the lock uncontended.
struct SyncBody(Mutex<BodyStream>);

impl Stream for SyncBody {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let stream = self.get_mut().0.get_mut().unwrap_or_else(PoisonError::into_inner);
        Pin::new(stream).poll_next(cx)
    }
}
