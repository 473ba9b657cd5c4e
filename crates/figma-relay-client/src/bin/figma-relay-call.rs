use anyhow::{bail, Context};
use clap::Parser;
use figma_relay_client::{config::resolve_url, ClientConfig, Dispatcher, RelayClient};
use figma_relay_core::{FigmaCommand, TimeoutPolicy};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "figma-relay-call",
    about = "Send one command to the Figma plugin through the relay and print the result"
)]
struct Args {
    /// Command name, e.g. get_document_info.
    command: String,
    #[arg(long)]
    channel: String,
    #[arg(long, default_value = "{}")]
    params: String,
    #[arg(long)]
    url: Option<String>,
    /// Seconds; defaults to the per-command timeout.
    #[arg(long)]
    timeout: Option<u64>,
    #[arg(long, default_value = "sliding")]
    policy: String,
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,
    /// Print progress updates to stderr.
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    let command: FigmaCommand = args.command.parse().map_err(anyhow::Error::msg)?;
    let params: Value = serde_json::from_str(&args.params).context("--params is not valid JSON")?;
    if !params.is_object() {
        bail!("--params must be a JSON object");
    }
    let policy: TimeoutPolicy = args.policy.parse().map_err(anyhow::Error::msg)?;
    let timeout = match args.timeout {
        Some(0) => bail!("--timeout must be greater than zero"),
        Some(seconds) => Some(Duration::from_secs(seconds)),
        None => None,
    };

    let mut config = ClientConfig::new(resolve_url(args.url.as_deref())?);
    config.policy = policy;
    config.connect_timeout = Duration::from_secs(args.connect_timeout);

    let client = Arc::new(
        RelayClient::connect(config)
            .await
            .context("could not reach the relay")?,
    );
    let dispatcher = Dispatcher::new(client.clone());
    let show_progress = args.progress;
    let outcome = dispatcher
        .dispatch_with_progress(&args.channel, command.as_str(), params, timeout, |update| {
            if show_progress {
                eprintln!(
                    "[{}] {}% {}",
                    update.status.as_str(),
                    update.progress,
                    update.message
                );
            }
        })
        .await;
    client.close().await;

    let result = outcome.with_context(|| format!("{command} failed"))?;
    info!(event = "call_done", command = %command);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn init_logging(debug: bool) {
    let level = if debug {
        "debug".to_string()
    } else {
        std::env::var("FIGMA_RELAY_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
