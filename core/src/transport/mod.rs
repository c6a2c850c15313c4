//! Transports and the one-time choice between them.
//!
//! # Design
//! Two transports implement [`Transport`]: [`NativeTransport`] over an async
//! HTTP client, and [`FallbackTransport`], a state machine driven by a
//! message-passing [`LegacyEngine`]. The [`TransportSelector`] picks one the
//! first time it is asked and never changes its answer, so every request of a
//! client goes through the same path.

mod fallback;
mod native;

use std::sync::OnceLock;

use futures_util::future::BoxFuture;
use tracing::{info, warn};

use crate::capabilities::TransportCapabilities;
use crate::config::TransportPreference;
use crate::error::Result;
use crate::request::Request;
use crate::response::Response;

pub use fallback::{ExchangeState, FallbackTransport, LegacyEngine, UreqEngine};
pub use native::NativeTransport;

pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run one exchange. Resolves once the response head is known; the body
    /// keeps arriving through the returned response.
    fn fetch(&self, request: Request) -> BoxFuture<'_, Result<Response>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportChoice {
    Native,
    Fallback,
}

/// Decides once, from an injected capability value, which transport to use.
#[derive(Debug)]
pub struct TransportSelector {
    caps: TransportCapabilities,
    preference: TransportPreference,
    choice: OnceLock<TransportChoice>,
}

impl TransportSelector {
    pub fn new(caps: TransportCapabilities, preference: TransportPreference) -> Self {
        Self {
            caps,
            preference,
            choice: OnceLock::new(),
        }
    }

    /// The decision, made on first call.
    pub fn choose(&self) -> TransportChoice {
        *self.choice.get_or_init(|| {
            let choice = decide(&self.caps, self.preference);
            info!(?choice, preference = ?self.preference, "transport selected");
            choice
        })
    }

    pub fn is_decided(&self) -> bool {
        self.choice.get().is_some()
    }
}

fn decide(caps: &TransportCapabilities, preference: TransportPreference) -> TransportChoice {
    match preference {
        TransportPreference::Fallback => TransportChoice::Fallback,
        TransportPreference::Native if caps.native => TransportChoice::Native,
        TransportPreference::Native => {
            warn!("native transport requested but unavailable");
            TransportChoice::Fallback
        }
        TransportPreference::Auto => {
            if caps.native && caps.native_abort && caps.native_response_stream {
                TransportChoice::Native
            } else {
                TransportChoice::Fallback
            }
        }
    }
}
