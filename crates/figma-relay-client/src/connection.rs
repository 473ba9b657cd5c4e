use crate::config::ClientConfig;
use crate::error::ClientError;
use figma_relay_core::protocol::{classify_inbound, join_request, Inbound};
use figma_relay_core::{mint_id, CorrelationError, DispatchError, PendingTable};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{
    net::TcpStream,
    sync::{mpsc, Mutex as AsyncMutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type RelaySocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum Outgoing {
    Frame(String),
    Close,
}

/// One connection to the relay hub. Replies, progress updates and membership
/// notices read from the socket are settled against the shared pending table.
pub struct RelayClient {
    config: ClientConfig,
    pending: Arc<PendingTable>,
    outbound: mpsc::Sender<Outgoing>,
    channel: Mutex<Option<String>>,
    join_lock: AsyncMutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let url = config.url.to_string();
        let connected =
            tokio::time::timeout(config.connect_timeout, connect_async(url.as_str())).await;
        let ws = match connected {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(source)) => return Err(ClientError::Connect { url, source }),
            Err(_) => return Err(ClientError::ConnectTimeout(config.connect_timeout)),
        };
        info!(event = "relay_connected", url = %url);

        let pending = PendingTable::new(config.pending_config());
        let (tx, rx) = mpsc::channel(config.outbound_capacity.max(1));
        let task = tokio::spawn(run_connection(ws, rx, pending.clone()));
        Ok(Self {
            config,
            pending,
            outbound: tx,
            channel: Mutex::new(None),
            join_lock: AsyncMutex::new(()),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }

    pub fn is_connected(&self) -> bool {
        !self.outbound.is_closed()
    }

    pub fn current_channel(&self) -> Option<String> {
        self.channel_lock().clone()
    }

    fn channel_lock(&self) -> MutexGuard<'_, Option<String>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Joins `channel` and waits for the relay's acknowledgment. A client is
    /// in at most one channel; requests still pending on the previous one can
    /// no longer be answered and fail with `ResponderGone`.
    pub async fn join_channel(&self, channel: &str) -> Result<Value, DispatchError> {
        let _guard = self.join_lock.lock().await;
        self.join_locked(channel).await
    }

    /// Joins `channel` unless this connection is already a member.
    pub async fn ensure_joined(&self, channel: &str) -> Result<(), DispatchError> {
        let _guard = self.join_lock.lock().await;
        if self.current_channel().as_deref() == Some(channel) {
            return Ok(());
        }
        self.join_locked(channel).await.map(|_| ())
    }

    async fn join_locked(&self, channel: &str) -> Result<Value, DispatchError> {
        if channel.trim().is_empty() {
            return Err(DispatchError::Rejected(
                "Channel name is required".to_string(),
            ));
        }
        let id = mint_id();
        let handle = self
            .pending
            .register(&id, channel, self.config.timeouts.default_timeout())?;
        self.submit(&id, &join_request(&id, channel)).await;
        let result = handle.wait().await?;

        let previous = self.channel_lock().replace(channel.to_string());
        if let Some(previous) = previous.filter(|previous| previous != channel) {
            let failed = self.pending.fail_channel(
                &previous,
                CorrelationError::ResponderGone {
                    channel: previous.clone(),
                },
            );
            if failed > 0 {
                warn!(event = "left_with_pending", channel = %previous, failed = failed);
            }
        }
        info!(event = "channel_joined", channel = channel, id = %id);
        Ok(result)
    }

    /// Queues `frame` for the socket. When the connection is already gone the
    /// pending entry for `id` is failed with `Disconnected`.
    pub(crate) async fn submit(&self, id: &str, frame: &Value) {
        if self
            .outbound
            .send(Outgoing::Frame(frame.to_string()))
            .await
            .is_err()
        {
            warn!(event = "submit_failed", id = id);
            self.pending
                .resolve(id, Err(CorrelationError::Disconnected.into()));
        }
    }

    /// Closes the socket and waits for the connection task to finish. Every
    /// request still pending fails with `Disconnected`.
    pub async fn close(&self) {
        let _ = self.outbound.send(Outgoing::Close).await;
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn run_connection(
    mut ws: RelaySocket,
    mut rx: mpsc::Receiver<Outgoing>,
    pending: Arc<PendingTable>,
) {
    let reason = loop {
        tokio::select! {
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => route_frame(&pending, &text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => route_frame(&pending, &text),
                    Err(_) => warn!(event = "binary_frame_not_utf8"),
                },
                Some(Ok(Message::Close(_))) | None => break "closed",
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(event = "read_error", error = %err);
                    break "read_error";
                }
            },
            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Frame(text)) => {
                    if let Err(err) = ws.send(Message::Text(text)).await {
                        warn!(event = "write_error", error = %err);
                        break "write_error";
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = ws.close(None).await;
                    break "client_closed";
                }
            },
        }
    };

    // Close the queue first so a late submit fails fast instead of waiting
    // out its timeout.
    rx.close();
    let failed = pending.fail_all(CorrelationError::Disconnected);
    info!(event = "relay_disconnected", reason = reason, failed = failed);
}

fn route_frame(pending: &PendingTable, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "invalid_json", error = %err);
            return;
        }
    };

    match classify_inbound(&frame) {
        Inbound::JoinAck {
            id: Some(id),
            channel,
            result,
        } => {
            if !pending.resolve(&id, Ok(result)) {
                debug!(event = "late_join_ack", id = %id, channel = %channel);
            }
        }
        Inbound::JoinAck { id: None, channel, .. } => {
            debug!(event = "join_ack_without_id", channel = %channel);
        }
        Inbound::Response { id, outcome } => {
            let outcome = outcome.map_err(|(message, detail)| DispatchError::Command {
                message,
                detail: Some(detail),
            });
            if !pending.resolve(&id, outcome) {
                debug!(event = "unmatched_response", id = %id);
            }
        }
        Inbound::Rejected { id, message } => {
            warn!(event = "request_rejected", id = %id, message = %message);
            pending.resolve(&id, Err(DispatchError::Rejected(message)));
        }
        Inbound::Progress(update) => {
            let id = update.command_id.clone();
            if !pending.progress(update) {
                debug!(event = "unmatched_progress", id = %id);
            }
        }
        Inbound::MemberLeft { channel, members } => {
            info!(event = "member_left", channel = %channel, members = members);
            if members <= 1 {
                let failed = pending.fail_channel(
                    &channel,
                    CorrelationError::ResponderGone {
                        channel: channel.clone(),
                    },
                );
                if failed > 0 {
                    warn!(event = "responder_gone", channel = %channel, failed = failed);
                }
            }
        }
        Inbound::RelayError { message } => {
            warn!(event = "relay_error", message = %message);
        }
        Inbound::Other => {
            debug!(event = "frame_ignored");
        }
    }
}
