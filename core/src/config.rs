//! Client configuration.
//!
//! Defaults suit most callers; `ClientConfig::from_env` lets a deployment
//! override them without code changes:
//!
//! | variable           | meaning                                   |
//! |--------------------|-------------------------------------------|
//! | `FETCH_TIMEOUT_MS` | whole-exchange timeout in milliseconds     |
//! | `FETCH_USER_AGENT` | `User-Agent` sent when a request has none  |
//! | `FETCH_TRANSPORT`  | `auto`, `native` or `fallback`             |
//! | `FETCH_CHUNK_SIZE` | read size of the fallback engine, in bytes |

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

pub const DEFAULT_USER_AGENT: &str = concat!("fetch-core/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// Which transport the caller wants, before capabilities are considered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportPreference {
    #[default]
    Auto,
    Native,
    Fallback,
}

impl FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "native" => Ok(Self::Native),
            "fallback" | "legacy" => Ok(Self::Fallback),
            other => Err(format!("unknown transport {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub timeout: Option<Duration>,
    pub user_agent: String,
    pub transport: TransportPreference,
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            transport: TransportPreference::Auto,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Malformed values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(raw) = lookup("FETCH_TIMEOUT_MS") {
            match raw.trim().parse::<u64>() {
                Ok(0) => config.timeout = None,
                Ok(ms) => config.timeout = Some(Duration::from_millis(ms)),
                Err(e) => warn!(value = %raw, error = %e, "ignoring FETCH_TIMEOUT_MS"),
            }
        }
        if let Some(agent) = lookup("FETCH_USER_AGENT") {
            if !agent.trim().is_empty() {
                config.user_agent = agent.trim().to_string();
            }
        }
        if let Some(raw) = lookup("FETCH_TRANSPORT") {
            match raw.parse() {
                Ok(pref) => config.transport = pref,
                Err(e) => warn!(error = %e, "ignoring FETCH_TRANSPORT"),
            }
        }
        if let Some(raw) = lookup("FETCH_CHUNK_SIZE") {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.chunk_size = n,
                _ => warn!(value = %raw, "ignoring FETCH_CHUNK_SIZE"),
            }
        }
        config
    }
}
