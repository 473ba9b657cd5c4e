use crate::config::HubConfig;
use crate::connection::{HealthReport, RelayHub};
use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::watch};
use tracing::{info, warn};

pub fn router(hub: Arc<RelayHub>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(hub)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<RelayHub>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket, addr).await;
    })
}

async fn health_handler(State(hub): State<Arc<RelayHub>>) -> Json<HealthReport> {
    Json(hub.health().await)
}

/// Binds the configured address and serves until `shutdown` flips to true.
pub async fn run(config: HubConfig, shutdown: watch::Receiver<bool>) -> io::Result<()> {
    let listener = TcpListener::bind(config.bind_addr()).await?;
    serve(listener, config, shutdown).await
}

pub async fn serve(
    listener: TcpListener,
    config: HubConfig,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let addr = listener.local_addr()?;
    if !addr.ip().is_loopback() {
        warn!(event = "non_loopback_bind", addr = %addr);
    }
    let hub = Arc::new(RelayHub::new(config));
    let app = router(hub.clone());

    info!(event = "relay_start", addr = %addr, url = %format!("ws://{addr}"));

    let closing = hub.clone();
    let signal = async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        info!(event = "relay_shutdown");
        closing.close_all("server shutting down").await;
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await?;
    info!(event = "relay_stopped", addr = %addr);
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(event = "signal_error", error = %err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
