use anyhow::Context;
use figma_relay_hub::{load_config, logging::init_logging, run, shutdown_signal};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config().context("invalid relay configuration")?;
    let _log_guard = init_logging(&config);
    info!(
        event = "config_loaded",
        host = %config.host,
        port = config.port,
        debug = config.debug,
        ping_interval_s = config.ping_interval.as_secs(),
        ping_timeout_s = config.ping_timeout.as_secs()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let addr = config.bind_addr();
    run(config, shutdown_rx)
        .await
        .with_context(|| format!("relay failed on {addr}"))?;
    Ok(())
}
