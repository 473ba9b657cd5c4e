use crate::broadcast::{announce_departure, broadcast};
use crate::config::HubConfig;
use crate::registry::{ChannelRegistry, Endpoint};
use axum::extract::ws::{Message, WebSocket};
use chrono::{DateTime, Utc};
use figma_relay_core::protocol::{
    classify_frame, frame_too_large_error, invalid_json_error, join_ack, missing_channel_error,
    routing_error, FrameIntent,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{sync::mpsc, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
    pub status: &'static str,
    pub clients: usize,
    pub channels: BTreeMap<String, usize>,
    pub started_at: String,
}

pub struct RelayHub {
    config: HubConfig,
    registry: ChannelRegistry,
    conn_counter: AtomicU64,
    started_at: DateTime<Utc>,
}

impl RelayHub {
    pub fn new(config: HubConfig) -> Self {
        Self {
            config,
            registry: ChannelRegistry::new(),
            conn_counter: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    pub async fn health(&self) -> HealthReport {
        let snapshot = self.registry.snapshot().await;
        HealthReport {
            status: "healthy",
            clients: snapshot.clients,
            channels: snapshot.channels,
            started_at: self.started_at.to_rfc3339(),
        }
    }

    /// Sends a close frame to every endpoint; their loops then unwind.
    pub async fn close_all(&self, reason: &str) {
        let endpoints = self.registry.endpoints().await;
        info!(event = "closing_endpoints", count = endpoints.len(), reason = reason);
        for endpoint in endpoints {
            endpoint.close(1001, reason);
        }
    }

    pub async fn handle_socket(self: Arc<Self>, socket: WebSocket, remote: SocketAddr) {
        let conn_id = self.next_conn_id();
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(self.config.queue_capacity);

        let write_timeout = self.config.write_timeout;
        let writer_conn = conn_id.clone();
        let mut write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                match tokio::time::timeout(write_timeout, ws_sender.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        debug!(event = "write_error", conn_id = %writer_conn, error = %err);
                        return;
                    }
                    Err(_) => {
                        warn!(event = "write_timeout", conn_id = %writer_conn);
                        return;
                    }
                }
                if closing {
                    return;
                }
            }
        });

        let endpoint = Arc::new(Endpoint::new(conn_id.clone(), remote, tx));
        let clients = self.registry.register(endpoint.clone()).await;
        info!(
            event = "client_connected",
            conn_id = %conn_id,
            remote = %remote,
            clients = clients
        );
        let ping_task = self.clone().start_ping(endpoint.clone());

        let reason = loop {
            let next = tokio::select! {
                next = ws_receiver.next() => next,
                _ = endpoint.evicted() => break "evicted",
                _ = &mut write_task => break "writer_closed",
            };
            let msg = match next {
                Some(Ok(msg)) => msg,
                Some(Err(err)) => {
                    warn!(event = "read_error", conn_id = %conn_id, error = %err);
                    break "read_error";
                }
                None => break "disconnect",
            };
            let data = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %conn_id);
                    break "close";
                }
                Message::Ping(_) | Message::Pong(_) => {
                    endpoint.touch().await;
                    continue;
                }
            };
            endpoint.touch().await;
            self.handle_frame(&endpoint, &data).await;
        };

        if let Some(task) = ping_task {
            task.abort();
        }
        self.disconnect(&endpoint, reason).await;
        if !write_task.is_finished() {
            endpoint.close(1000, "");
            let _ = tokio::time::timeout(self.config.write_timeout, &mut write_task).await;
        }
    }

    async fn handle_frame(&self, endpoint: &Endpoint, data: &[u8]) {
        if data.len() > self.config.max_frame_bytes {
            warn!(
                event = "frame_too_large",
                conn_id = %endpoint.conn_id,
                size = data.len()
            );
            self.reply(
                endpoint,
                &frame_too_large_error(data.len(), self.config.max_frame_bytes),
            )
            .await;
            return;
        }

        let frame: Value = match serde_json::from_slice(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "invalid_json", conn_id = %endpoint.conn_id, error = %err);
                self.reply(endpoint, &invalid_json_error()).await;
                return;
            }
        };
        if self.config.debug {
            debug!(event = "frame_received", conn_id = %endpoint.conn_id, raw = %String::from_utf8_lossy(data));
        }

        match classify_frame(&frame) {
            FrameIntent::Join {
                id,
                channel: Some(channel),
            } => {
                let Some(outcome) = self.registry.join(&endpoint.conn_id, &channel).await else {
                    warn!(event = "join_after_eviction", conn_id = %endpoint.conn_id);
                    return;
                };
                if let Some(previous) = &outcome.previous {
                    info!(
                        event = "channel_left",
                        conn_id = %endpoint.conn_id,
                        channel = %previous.channel,
                        remaining = previous.remaining
                    );
                    announce_departure(&self.registry, previous).await;
                }
                info!(
                    event = "channel_joined",
                    conn_id = %endpoint.conn_id,
                    channel = %channel,
                    members = outcome.members,
                    rejoin = outcome.already_member
                );
                self.reply(endpoint, &join_ack(&channel, id.as_deref())).await;
            }
            FrameIntent::Join { channel: None, .. } => {
                warn!(event = "join_missing_channel", conn_id = %endpoint.conn_id);
                self.reply(endpoint, &missing_channel_error()).await;
            }
            FrameIntent::Broadcast { id, channel } => match channel {
                Some(channel) if self.registry.is_member(&endpoint.conn_id, &channel).await => {
                    let report = broadcast(
                        &self.registry,
                        &channel,
                        &frame.to_string(),
                        Some(&endpoint.conn_id),
                    )
                    .await;
                    if report.delivered == 0 {
                        debug!(event = "broadcast_no_peers", conn_id = %endpoint.conn_id, channel = %channel);
                    }
                }
                channel => {
                    warn!(
                        event = "routing_error",
                        conn_id = %endpoint.conn_id,
                        channel = channel.as_deref().unwrap_or_default()
                    );
                    self.reply(endpoint, &routing_error(id.as_deref(), channel.as_deref()))
                        .await;
                }
            },
            FrameIntent::Direct { id } => {
                debug!(event = "direct_message", conn_id = %endpoint.conn_id, id = %id);
            }
            FrameIntent::Unrecognized { kind } => {
                warn!(
                    event = "unknown_message",
                    conn_id = %endpoint.conn_id,
                    r#type = kind.as_deref().unwrap_or("no-type")
                );
            }
        }
    }

    async fn reply(&self, endpoint: &Endpoint, value: &Value) {
        if !endpoint.send_text(&value.to_string()).await {
            debug!(event = "reply_dropped", conn_id = %endpoint.conn_id);
        }
    }

    async fn disconnect(&self, endpoint: &Endpoint, reason: &str) {
        if let Some(departure) = self.registry.unregister(&endpoint.conn_id).await {
            info!(
                event = "channel_left",
                conn_id = %endpoint.conn_id,
                channel = %departure.channel,
                remaining = departure.remaining
            );
            announce_departure(&self.registry, &departure).await;
        }
        let clients = self.registry.snapshot().await.clients;
        info!(
            event = "client_disconnected",
            conn_id = %endpoint.conn_id,
            remote = %endpoint.remote,
            reason = reason,
            clients = clients
        );
    }

    fn start_ping(self: Arc<Self>, endpoint: Arc<Endpoint>) -> Option<JoinHandle<()>> {
        if self.config.ping_interval.is_zero() {
            return None;
        }
        let interval = self.config.ping_interval;
        let stale_after = self.config.stale_after();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Some(stale_after) = stale_after {
                    let idle = Instant::now().duration_since(endpoint.last_seen().await);
                    if idle > stale_after {
                        warn!(event = "stale_close", conn_id = %endpoint.conn_id, idle_ms = idle.as_millis() as u64);
                        endpoint.close(1001, "stale");
                        return;
                    }
                }
                if !endpoint.send_ping().await {
                    warn!(event = "ping_failed", conn_id = %endpoint.conn_id);
                    endpoint.close(1011, "ping failed");
                    return;
                }
            }
        }))
    }
}
