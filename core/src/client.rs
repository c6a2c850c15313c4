//! The client context: one capability snapshot, one transport decision.
//!
//! # Design
//! `Client` holds everything a `fetch` needs that is not part of the request
//! itself. The capability value is passed in explicitly, so tests can build a
//! client for a degraded environment. Transports are constructed lazily, and
//! only the one the selector picks is ever built.

use std::sync::OnceLock;

use tracing::debug;

use crate::capabilities::Capabilities;
use crate::config::ClientConfig;
use crate::error::{FetchError, Result};
use crate::request::{Request, RequestInit};
use crate::response::Response;
use crate::transport::{FallbackTransport, NativeTransport, Transport, TransportChoice, TransportSelector};

/// What `fetch` accepts as its first argument.
pub enum FetchInput {
    Url(String),
    Request(Request),
}

impl From<&str> for FetchInput {
    fn from(url: &str) -> Self {
        FetchInput::Url(url.to_string())
    }
}

impl From<String> for FetchInput {
    fn from(url: String) -> Self {
        FetchInput::Url(url)
    }
}

impl From<&String> for FetchInput {
    fn from(url: &String) -> Self {
        FetchInput::Url(url.clone())
    }
}

impl From<Request> for FetchInput {
    fn from(request: Request) -> Self {
        FetchInput::Request(request)
    }
}

pub struct Client {
    config: ClientConfig,
    caps: Capabilities,
    selector: TransportSelector,
    native: OnceLock<std::result::Result<NativeTransport, FetchError>>,
    fallback: OnceLock<FallbackTransport>,
}

impl Client {
    /// A client for the running environment, configured by `config`.
    pub fn new(config: ClientConfig) -> Self {
        let caps = Capabilities::probe(&config);
        Self::with_capabilities(config, caps)
    }

    pub fn with_capabilities(config: ClientConfig, caps: Capabilities) -> Self {
        let selector = TransportSelector::new(caps.transport, config.transport);
        Self {
            config,
            caps,
            selector,
            native: OnceLock::new(),
            fallback: OnceLock::new(),
        }
    }

    /// The process-wide client behind [`crate::fetch`], configured from the
    /// environment.
    pub fn shared() -> &'static Client {
        static SHARED: OnceLock<Client> = OnceLock::new();
        SHARED.get_or_init(|| Client::with_capabilities(ClientConfig::from_env(), *Capabilities::snapshot()))
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build a request from `input` and `init`, send it, and resolve with the
    /// response once its head has arrived.
    pub async fn fetch(&self, input: impl Into<FetchInput>, init: RequestInit) -> Result<Response> {
        let request = match input.into() {
            FetchInput::Url(url) => Request::with_capabilities(url, init, self.caps)?,
            FetchInput::Request(mut source) => Request::from_request(&mut source, init)?,
        };
        let transport = self.transport()?;
        debug!(
            method = %request.method(),
            url = %request.url(),
            transport = transport.name(),
            "fetch"
        );
        transport.fetch(request).await
    }

    /// A request object bound to this client's capabilities.
    pub fn request(&self, url: impl Into<String>, init: RequestInit) -> Result<Request> {
        Request::with_capabilities(url, init, self.caps)
    }

    fn transport(&self) -> Result<&dyn Transport> {
        match self.selector.choose() {
            TransportChoice::Native => self
                .native
                .get_or_init(|| NativeTransport::new(&self.config, self.caps.transport))
                .as_ref()
                .map(|t| t as &dyn Transport)
                .map_err(Clone::clone),
            TransportChoice::Fallback => Ok(self
                .fallback
                .get_or_init(|| FallbackTransport::new(&self.config, self.caps.transport))
                as &dyn Transport),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("caps", &self.caps)
            .field("selector", &self.selector)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::TransportCapabilities;
    use crate::config::TransportPreference;
    use crate::signal::AbortSignal;

    #[test]
    fn transport_follows_capabilities() {
        let client = Client::with_capabilities(ClientConfig::default(), Capabilities::full());
        assert_eq!(client.transport().unwrap().name(), "native");

        let caps = Capabilities {
            transport: TransportCapabilities::legacy_only(),
            ..Capabilities::full()
        };
        let client = Client::with_capabilities(ClientConfig::default(), caps);
        assert_eq!(client.transport().unwrap().name(), "fallback");
    }

    #[test]
    fn fallback_preference_is_honoured() {
        let config = ClientConfig {
            transport: TransportPreference::Fallback,
            ..ClientConfig::default()
        };
        let client = Client::new(config);
        assert_eq!(client.transport().unwrap().name(), "fallback");
    }

    #[tokio::test]
    async fn construction_errors_surface_before_any_transport_work() {
        let client = Client::with_capabilities(ClientConfig::default(), Capabilities::full());
        let err = client
            .fetch("https://x/", RequestInit::new().method("GET").body("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::BodyNotAllowed { .. }));
        assert!(!client.selector.is_decided());
    }

    #[tokio::test]
    async fn fetch_with_aborted_signal_rejects() {
        let client = Client::with_capabilities(ClientConfig::default(), Capabilities::full());
        let err = client
            .fetch("http://127.0.0.1:9/", RequestInit::new().signal(AbortSignal::already_aborted()))
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }

    #[tokio::test]
    async fn fetch_from_used_request_fails() {
        let client = Client::with_capabilities(ClientConfig::default(), Capabilities::full());
        let mut request = client
            .request("http://127.0.0.1:9/", RequestInit::new().method("POST").body("x"))
            .unwrap();
        request.text().await.unwrap();
        let err = client.fetch(request, RequestInit::new()).await.unwrap_err();
        assert!(matches!(err, FetchError::AlreadyUsed));
    }
}
