use crate::error::ClientError;
use figma_relay_core::{PendingConfig, TimeoutPolicy, TimeoutTable};
use std::time::Duration;
use url::Url;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3055";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: Url,
    pub timeouts: TimeoutTable,
    pub policy: TimeoutPolicy,
    pub max_pending: Option<usize>,
    pub connect_timeout: Duration,
    /// Frames queued for the socket before `dispatch` starts waiting.
    pub outbound_capacity: usize,
}

impl ClientConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            timeouts: TimeoutTable::default(),
            policy: TimeoutPolicy::default(),
            max_pending: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            outbound_capacity: 64,
        }
    }

    pub fn from_url(url: &str) -> Result<Self, ClientError> {
        Ok(Self::new(parse_relay_url(url)?))
    }

    pub fn pending_config(&self) -> PendingConfig {
        PendingConfig {
            policy: self.policy,
            max_pending: self.max_pending,
        }
    }
}

/// Flag value first, then `FIGMA_RELAY_URL`, then the local default.
pub fn resolve_url(url_flag: Option<&str>) -> Result<Url, ClientError> {
    if let Some(url) = url_flag.filter(|value| !value.trim().is_empty()) {
        return parse_relay_url(url);
    }
    match std::env::var("FIGMA_RELAY_URL") {
        Ok(value) if !value.trim().is_empty() => parse_relay_url(&value),
        _ => parse_relay_url(DEFAULT_RELAY_URL),
    }
}

pub fn parse_relay_url(raw: &str) -> Result<Url, ClientError> {
    let url = Url::parse(raw.trim()).map_err(|source| ClientError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ClientError::UnsupportedScheme(other.to_string())),
    }
}
