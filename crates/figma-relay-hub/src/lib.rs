pub mod broadcast;
pub mod config;
pub mod connection;
pub mod logging;
pub mod registry;
pub mod server;

pub use config::{load_config, HubConfig};
pub use connection::{HealthReport, RelayHub};
pub use server::{router, run, serve, shutdown_signal};
