//! What the running environment can do.
//!
//! # Design
//! Capabilities are plain data. The production entry point computes one
//! snapshot with [`Capabilities::probe`] and caches it for the life of the
//! process; tests construct the struct directly to exercise degraded paths
//! (no response streaming, no incremental fallback mode, no blob support).

use std::sync::OnceLock;

use tracing::debug;

use crate::config::{ClientConfig, TransportPreference};

/// Body representations the environment can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub blob: bool,
    pub form_data: bool,
    pub search_params: bool,
    pub stream: bool,
    pub transport: TransportCapabilities,
}

/// Features of the two HTTP primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportCapabilities {
    /// A native async HTTP primitive exists.
    pub native: bool,
    /// The native primitive can be cancelled through a signal.
    pub native_abort: bool,
    /// The native primitive exposes response bodies as streams.
    pub native_response_stream: bool,
    /// The native primitive accepts a stream as the request body.
    pub native_request_stream: bool,
    /// The legacy engine can deliver the response body incrementally.
    pub fallback_incremental: bool,
}

impl TransportCapabilities {
    pub const fn full() -> Self {
        Self {
            native: true,
            native_abort: true,
            native_response_stream: true,
            native_request_stream: true,
            fallback_incremental: true,
        }
    }

    /// Only the legacy engine, without incremental delivery.
    pub const fn legacy_only() -> Self {
        Self {
            native: false,
            native_abort: false,
            native_response_stream: false,
            native_request_stream: false,
            fallback_incremental: false,
        }
    }
}

impl Capabilities {
    pub const fn full() -> Self {
        Self {
            blob: true,
            form_data: true,
            search_params: true,
            stream: true,
            transport: TransportCapabilities::full(),
        }
    }

    /// The production probe. Both primitives are linked into this crate, so
    /// availability comes down to the configured preference.
    pub fn probe(config: &ClientConfig) -> Self {
        let mut caps = Self::full();
        if config.transport == TransportPreference::Fallback {
            caps.transport.native = false;
        }
        debug!(?caps, "probed capabilities");
        caps
    }

    /// The process-wide snapshot, probed once from the environment.
    pub fn snapshot() -> &'static Capabilities {
        static SNAPSHOT: OnceLock<Capabilities> = OnceLock::new();
        SNAPSHOT.get_or_init(|| Self::probe(&ClientConfig::from_env()))
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}
