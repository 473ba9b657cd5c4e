//! Client side of the Figma relay: one WebSocket connection to the hub and a
//! dispatcher that turns design commands into awaitable results.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;

pub use config::ClientConfig;
pub use connection::RelayClient;
pub use dispatch::Dispatcher;
pub use error::ClientError;
