use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failures of the request/response pairing itself, as opposed to the design
/// tool answering with an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorrelationError {
    #[error("request {id} timed out after {timeout:?} without a response")]
    Timeout { id: String, timeout: Duration },
    #[error("no responder left on channel '{channel}'")]
    ResponderGone { channel: String },
    #[error("relay connection closed")]
    Disconnected,
    #[error("duplicate correlation id: {0}")]
    DuplicateId(String),
    #[error("timeout must be greater than zero")]
    InvalidTimeout,
    #[error("too many pending requests: limit is {max}")]
    CapacityExceeded { max: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    /// The design tool answered, and the answer was an error.
    #[error("command failed: {message}")]
    Command {
        message: String,
        detail: Option<Value>,
    },
    /// The relay refused to route the request (unknown or un-joined channel).
    #[error("relay rejected request: {0}")]
    Rejected(String),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

impl DispatchError {
    pub fn command(message: impl Into<String>) -> Self {
        DispatchError::Command {
            message: message.into(),
            detail: None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            DispatchError::Correlation(CorrelationError::Timeout { .. })
        )
    }

    /// True when the request was never answered, so retrying may help.
    pub fn is_unanswered(&self) -> bool {
        matches!(self, DispatchError::Correlation(_))
    }
}
