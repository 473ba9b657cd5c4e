use clap::Parser;
use figma_relay_core::protocol::DEFAULT_MAX_FRAME_BYTES;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3055;

#[derive(Clone, Debug)]
pub struct HubConfig {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    /// Zero disables keepalive pings and stale eviction.
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub write_timeout: Duration,
    pub queue_capacity: usize,
    pub max_frame_bytes: usize,
    pub log_dir: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            debug: false,
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            queue_capacity: 256,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            log_dir: String::new(),
        }
    }
}

impl HubConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// A connection silent for longer than this is evicted.
    pub fn stale_after(&self) -> Option<Duration> {
        if self.ping_interval.is_zero() {
            return None;
        }
        Some(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "figma-relay-hub",
    about = "WebSocket relay between the Figma plugin and command clients"
)]
pub struct Args {
    #[arg(long, default_value = "")]
    pub host: String,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    #[arg(long, default_value_t = 20)]
    pub ping_interval: u64,
    #[arg(long, default_value_t = 10)]
    pub ping_timeout: u64,
    #[arg(long, default_value_t = 10)]
    pub write_timeout: u64,
    #[arg(long, default_value_t = 256)]
    pub queue_capacity: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,
    #[arg(long, default_value = "")]
    pub log_dir: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("max frame size must be at least 1 byte")]
    ZeroFrameLimit,
}

pub fn load_config() -> Result<HubConfig, ConfigError> {
    from_args(Args::parse())
}

pub fn from_args(args: Args) -> Result<HubConfig, ConfigError> {
    if args.queue_capacity == 0 {
        return Err(ConfigError::ZeroQueueCapacity);
    }
    if args.max_frame_bytes == 0 {
        return Err(ConfigError::ZeroFrameLimit);
    }
    Ok(HubConfig {
        host: resolve_host(&args.host),
        port: resolve_port(args.port)?,
        debug: args.debug || env_true("FIGMA_RELAY_DEBUG"),
        ping_interval: Duration::from_secs(args.ping_interval),
        ping_timeout: Duration::from_secs(args.ping_timeout),
        write_timeout: Duration::from_secs(args.write_timeout),
        queue_capacity: args.queue_capacity,
        max_frame_bytes: args.max_frame_bytes,
        log_dir: resolve_log_dir(&args.log_dir),
    })
}

fn resolve_host(host_flag: &str) -> String {
    if !host_flag.trim().is_empty() {
        return host_flag.trim().to_string();
    }
    if let Ok(value) = std::env::var("FIGMA_RELAY_HOST") {
        if !value.trim().is_empty() {
            return value.trim().to_string();
        }
    }
    DEFAULT_HOST.to_string()
}

fn resolve_port(port_flag: Option<u16>) -> Result<u16, ConfigError> {
    if let Some(port) = port_flag {
        return Ok(port);
    }
    match std::env::var("FIGMA_RELAY_PORT") {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(value)),
        _ => Ok(DEFAULT_PORT),
    }
}

fn resolve_log_dir(log_dir_flag: &str) -> String {
    if !log_dir_flag.trim().is_empty() {
        return log_dir_flag.to_string();
    }
    std::env::var("FIGMA_RELAY_LOG_DIR").unwrap_or_default()
}

pub fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}
