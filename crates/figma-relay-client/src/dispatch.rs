use crate::connection::RelayClient;
use figma_relay_core::protocol::command_envelope;
use figma_relay_core::{mint_id, DispatchError, FigmaCommand, Outcome, PendingHandle, ProgressUpdate};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sends design commands through a relay channel and waits for their replies.
///
/// Each call mints its own correlation id, so any number of dispatches can
/// be in flight on one connection.
#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<RelayClient>,
}

impl Dispatcher {
    pub fn new(client: Arc<RelayClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<RelayClient> {
        &self.client
    }

    /// `timeout` of `None` uses the per-command default.
    pub async fn dispatch(
        &self,
        channel: &str,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Outcome {
        self.dispatch_with_progress(channel, command, params, timeout, |_| {})
            .await
    }

    pub async fn dispatch_command(
        &self,
        channel: &str,
        command: FigmaCommand,
        params: Value,
    ) -> Outcome {
        self.dispatch(channel, command.as_str(), params, None).await
    }

    /// Like `dispatch`, passing each progress update to `on_progress` before
    /// the terminal outcome is returned.
    pub async fn dispatch_with_progress<F>(
        &self,
        channel: &str,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
        on_progress: F,
    ) -> Outcome
    where
        F: FnMut(ProgressUpdate),
    {
        let started = Instant::now();
        let handle = self.send(channel, command, params, timeout).await?;
        let id = handle.id().to_string();
        let outcome = handle.wait_with_progress(on_progress).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(
                event = "command_completed",
                id = %id,
                command = command,
                elapsed_ms = elapsed_ms
            ),
            Err(err) => warn!(
                event = "command_failed",
                id = %id,
                command = command,
                elapsed_ms = elapsed_ms,
                error = %err
            ),
        }
        outcome
    }

    async fn send(
        &self,
        channel: &str,
        command: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> Result<PendingHandle, DispatchError> {
        let timeout =
            timeout.unwrap_or_else(|| self.client.config().timeouts.for_command(command));
        // Joining may move this connection off another channel, so a request
        // that would be refused anyway must not get that far.
        self.client.pending().admit(timeout)?;
        self.client.ensure_joined(channel).await?;
        let id = mint_id();
        let handle = self.client.pending().register(&id, channel, timeout)?;
        debug!(
            event = "command_sent",
            id = %id,
            channel = channel,
            command = command,
            timeout_ms = timeout.as_millis() as u64
        );
        self.client
            .submit(&id, &command_envelope(&id, channel, command, params))
            .await;
        Ok(handle)
    }
}
