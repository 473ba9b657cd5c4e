use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid relay url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("relay url must use ws:// or wss://, got '{0}'")]
    UnsupportedScheme(String),
    #[error("timed out after {0:?} connecting to the relay")]
    ConnectTimeout(Duration),
    #[error("failed to connect to relay at {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
}
