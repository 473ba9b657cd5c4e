use crate::error::{CorrelationError, DispatchError};
use crate::protocol::{ProgressStatus, ProgressUpdate};
use crate::timeouts::TimeoutPolicy;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

pub type Outcome = Result<Value, DispatchError>;

pub fn mint_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Default)]
pub struct PendingConfig {
    pub policy: TimeoutPolicy,
    pub max_pending: Option<usize>,
}

struct Entry {
    channel: String,
    timeout: Duration,
    last_activity: Instant,
    deadline: Instant,
    slot: oneshot::Sender<Outcome>,
    progress: mpsc::UnboundedSender<ProgressUpdate>,
    timer: Option<AbortHandle>,
}

impl Entry {
    fn finish(self, outcome: Outcome) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The caller may have stopped waiting; nothing to do then.
        let _ = self.slot.send(outcome);
    }
}

/// In-flight requests keyed by correlation id.
///
/// Every entry is settled exactly once: by `resolve`, by a terminal progress
/// update, by `fail_channel`/`fail_all`, or by its expiry timer. Whichever
/// removes the entry from the map first wins and later attempts are no-ops.
/// The map lock is never held across an await.
pub struct PendingTable {
    config: PendingConfig,
    entries: Mutex<HashMap<String, Entry>>,
}

impl PendingTable {
    pub fn new(config: PendingConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            entries: Mutex::new(HashMap::new()),
        })
    }

    pub fn policy(&self) -> TimeoutPolicy {
        self.config.policy
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks that a request with `timeout` would be accepted now, without
    /// registering anything. Lets callers refuse before doing network work.
    pub fn admit(&self, timeout: Duration) -> Result<(), CorrelationError> {
        if timeout.is_zero() {
            return Err(CorrelationError::InvalidTimeout);
        }
        if let Some(max) = self.config.max_pending {
            if self.entries().len() >= max {
                return Err(CorrelationError::CapacityExceeded { max });
            }
        }
        Ok(())
    }

    /// Creates the entry and arms its timer. Must be called inside a Tokio
    /// runtime.
    pub fn register(
        self: &Arc<Self>,
        id: &str,
        channel: &str,
        timeout: Duration,
    ) -> Result<PendingHandle, CorrelationError> {
        if timeout.is_zero() {
            return Err(CorrelationError::InvalidTimeout);
        }
        let (slot, outcome) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let now = Instant::now();
        let deadline = now + timeout;

        let mut entries = self.entries();
        if entries.contains_key(id) {
            return Err(CorrelationError::DuplicateId(id.to_string()));
        }
        if let Some(max) = self.config.max_pending {
            if entries.len() >= max {
                return Err(CorrelationError::CapacityExceeded { max });
            }
        }
        let timer = spawn_timer(Arc::downgrade(self), id.to_string(), deadline);
        entries.insert(
            id.to_string(),
            Entry {
                channel: channel.to_string(),
                timeout,
                last_activity: now,
                deadline,
                slot,
                progress: progress_tx,
                timer: Some(timer),
            },
        );
        let pending = entries.len();
        drop(entries);

        debug!(
            event = "request_registered",
            id = id,
            channel = channel,
            timeout_ms = timeout.as_millis() as u64,
            pending = pending
        );
        Ok(PendingHandle {
            id: id.to_string(),
            outcome,
            progress: progress_rx,
        })
    }

    /// Settles `id` with `outcome`. Returns false when the id is unknown,
    /// which is expected for late replies after a timeout.
    pub fn resolve(&self, id: &str, outcome: Outcome) -> bool {
        let entry = self.entries().remove(id);
        match entry {
            Some(entry) => {
                debug!(
                    event = "request_resolved",
                    id = id,
                    channel = %entry.channel,
                    ok = outcome.is_ok()
                );
                entry.finish(outcome);
                true
            }
            None => {
                debug!(event = "request_resolution_discarded", id = id);
                false
            }
        }
    }

    /// Records activity for the update's command id and hands the update to
    /// the waiting caller. A terminal `error` status, or `completed` carrying
    /// a payload, also settles the request.
    pub fn progress(&self, update: ProgressUpdate) -> bool {
        let id = update.command_id.clone();
        let terminal = match update.status {
            ProgressStatus::Error => Some(Err(DispatchError::Command {
                message: if update.message.is_empty() {
                    "command reported an error".to_string()
                } else {
                    update.message.clone()
                },
                detail: update.payload.clone(),
            })),
            ProgressStatus::Completed => update.payload.clone().map(Ok),
            ProgressStatus::Started | ProgressStatus::InProgress => None,
        };

        {
            let mut entries = self.entries();
            let Some(entry) = entries.get_mut(&id) else {
                debug!(event = "progress_unknown_id", id = %id);
                return false;
            };
            let now = Instant::now();
            entry.last_activity = now;
            if self.config.policy == TimeoutPolicy::Sliding {
                entry.deadline = now + entry.timeout;
            }
            debug!(
                event = "request_progress",
                id = %id,
                status = ?update.status,
                processed = update.processed_items,
                total = update.total_items
            );
            let _ = entry.progress.send(update);
        }

        if let Some(outcome) = terminal {
            self.resolve(&id, outcome);
        }
        true
    }

    /// Fails every request addressed to `channel`.
    pub fn fail_channel(&self, channel: &str, error: CorrelationError) -> usize {
        let failed = {
            let mut entries = self.entries();
            let ids = entries
                .iter()
                .filter(|(_, entry)| entry.channel == channel)
                .map(|(id, _)| id.clone())
                .collect::<Vec<_>>();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id))
                .collect::<Vec<_>>()
        };
        let count = failed.len();
        for entry in failed {
            entry.finish(Err(error.clone().into()));
        }
        if count > 0 {
            warn!(event = "requests_failed", channel = channel, count = count, reason = %error);
        }
        count
    }

    pub fn fail_all(&self, error: CorrelationError) -> usize {
        let failed = self.entries().drain().map(|(_, entry)| entry).collect::<Vec<_>>();
        let count = failed.len();
        for entry in failed {
            entry.finish(Err(error.clone().into()));
        }
        if count > 0 {
            warn!(event = "requests_failed", count = count, reason = %error);
        }
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    pub fn last_activity(&self, id: &str) -> Option<Instant> {
        self.entries().get(id).map(|entry| entry.last_activity)
    }

    /// Called by the timer. Returns the next wake-up when the deadline moved.
    fn expire(&self, id: &str, now: Instant) -> Option<Instant> {
        let mut entries = self.entries();
        let deadline = entries.get(id)?.deadline;
        if now < deadline {
            return Some(deadline);
        }
        let mut entry = entries.remove(id)?;
        drop(entries);

        entry.timer = None;
        warn!(
            event = "request_timeout",
            id = id,
            channel = %entry.channel,
            timeout_ms = entry.timeout.as_millis() as u64
        );
        let timeout = entry.timeout;
        entry.finish(Err(CorrelationError::Timeout {
            id: id.to_string(),
            timeout,
        }
        .into()));
        None
    }
}

impl Drop for PendingTable {
    fn drop(&mut self) {
        let entries = self.entries.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in entries.values() {
            if let Some(timer) = &entry.timer {
                timer.abort();
            }
        }
    }
}

fn spawn_timer(table: Weak<PendingTable>, id: String, deadline: Instant) -> AbortHandle {
    tokio::spawn(async move {
        let mut wake_at = deadline;
        loop {
            tokio::time::sleep_until(wake_at).await;
            let Some(table) = table.upgrade() else {
                return;
            };
            match table.expire(&id, Instant::now()) {
                Some(next) => wake_at = next,
                None => return,
            }
        }
    })
    .abort_handle()
}

/// The caller's side of a pending request. Dropping it abandons interest;
/// the entry is still settled later by a reply or its timer.
#[derive(Debug)]
pub struct PendingHandle {
    id: String,
    outcome: oneshot::Receiver<Outcome>,
    progress: mpsc::UnboundedReceiver<ProgressUpdate>,
}

impl PendingHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn wait(self) -> Outcome {
        self.wait_with_progress(|_| {}).await
    }

    /// Waits for the terminal outcome, passing every progress update that
    /// arrives first to `on_progress`.
    pub async fn wait_with_progress<F>(mut self, mut on_progress: F) -> Outcome
    where
        F: FnMut(ProgressUpdate),
    {
        loop {
            tokio::select! {
                biased;
                Some(update) = self.progress.recv() => on_progress(update),
                outcome = &mut self.outcome => {
                    while let Ok(update) = self.progress.try_recv() {
                        on_progress(update);
                    }
                    return outcome
                        .unwrap_or_else(|_| Err(CorrelationError::Disconnected.into()));
                }
            }
        }
    }
}
