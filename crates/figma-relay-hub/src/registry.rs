use axum::extract::ws::{CloseFrame, Message};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    net::SocketAddr,
    sync::Arc,
};
use tokio::{
    sync::{mpsc, Mutex as AsyncMutex, Notify, RwLock},
    time::Instant,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The connection's writer is gone.
    Closed,
    /// The outbound queue is full; the peer is not keeping up.
    Backlogged,
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Closed => f.write_str("closed"),
            DeliveryFailure::Backlogged => f.write_str("backlogged"),
        }
    }
}

/// One live connection to the relay.
pub struct Endpoint {
    pub conn_id: String,
    pub remote: SocketAddr,
    sender: mpsc::Sender<Message>,
    last_seen: AsyncMutex<Instant>,
    evicted: Notify,
}

impl Endpoint {
    pub fn new(conn_id: String, remote: SocketAddr, sender: mpsc::Sender<Message>) -> Self {
        Self {
            conn_id,
            remote,
            sender,
            last_seen: AsyncMutex::new(Instant::now()),
            evicted: Notify::new(),
        }
    }

    pub async fn touch(&self) {
        *self.last_seen.lock().await = Instant::now();
    }

    pub async fn last_seen(&self) -> Instant {
        *self.last_seen.lock().await
    }

    /// Queues a reply for this endpoint, waiting for queue space.
    pub async fn send_text(&self, text: &str) -> bool {
        self.sender
            .send(Message::Text(text.to_string()))
            .await
            .is_ok()
    }

    pub async fn send_ping(&self) -> bool {
        self.sender.send(Message::Ping(Vec::new())).await.is_ok()
    }

    /// Queues without waiting, so one slow peer cannot stall a fan-out.
    pub fn try_send_text(&self, text: &str) -> Result<(), DeliveryFailure> {
        self.sender
            .try_send(Message::Text(text.to_string()))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
                mpsc::error::TrySendError::Full(_) => DeliveryFailure::Backlogged,
            })
    }

    /// Asks the peer to close and wakes the connection loop so it stops.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.try_send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })));
        self.evicted.notify_one();
    }

    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }
}

/// A channel the endpoint was removed from, and how many members remain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub channel: String,
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub members: usize,
    pub already_member: bool,
    pub previous: Option<Departure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistrySnapshot {
    pub clients: usize,
    pub channels: BTreeMap<String, usize>,
}

#[derive(Default)]
struct RegistryState {
    endpoints: HashMap<String, Arc<Endpoint>>,
    channels: HashMap<String, HashSet<String>>,
    membership: HashMap<String, String>,
}

impl RegistryState {
    fn leave(&mut self, conn_id: &str) -> Option<Departure> {
        let channel = self.membership.remove(conn_id)?;
        let remaining = match self.channels.get_mut(&channel) {
            Some(members) => {
                members.remove(conn_id);
                members.len()
            }
            None => 0,
        };
        if remaining == 0 {
            self.channels.remove(&channel);
        }
        Some(Departure { channel, remaining })
    }
}

/// Connected endpoints and their channel membership. A channel exists only
/// while it has members, and an endpoint is in at most one channel.
#[derive(Default)]
pub struct ChannelRegistry {
    state: RwLock<RegistryState>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of connected endpoints.
    pub async fn register(&self, endpoint: Arc<Endpoint>) -> usize {
        let mut state = self.state.write().await;
        state
            .endpoints
            .insert(endpoint.conn_id.clone(), endpoint);
        state.endpoints.len()
    }

    /// Removes the endpoint entirely. Returns the channel it left, if any.
    pub async fn unregister(&self, conn_id: &str) -> Option<Departure> {
        let mut state = self.state.write().await;
        state.endpoints.remove(conn_id);
        state.leave(conn_id)
    }

    /// Returns `None` when the endpoint is not registered (already evicted).
    pub async fn join(&self, conn_id: &str, channel: &str) -> Option<JoinOutcome> {
        let mut state = self.state.write().await;
        if !state.endpoints.contains_key(conn_id) {
            return None;
        }
        if state.membership.get(conn_id).map(String::as_str) == Some(channel) {
            let members = state.channels.get(channel).map_or(0, HashSet::len);
            return Some(JoinOutcome {
                members,
                already_member: true,
                previous: None,
            });
        }
        let previous = state.leave(conn_id);
        let members = {
            let entry = state.channels.entry(channel.to_string()).or_default();
            entry.insert(conn_id.to_string());
            entry.len()
        };
        state
            .membership
            .insert(conn_id.to_string(), channel.to_string());
        Some(JoinOutcome {
            members,
            already_member: false,
            previous,
        })
    }

    pub async fn leave(&self, conn_id: &str) -> Option<Departure> {
        self.state.write().await.leave(conn_id)
    }

    pub async fn members_of(&self, channel: &str) -> Vec<Arc<Endpoint>> {
        let state = self.state.read().await;
        state
            .channels
            .get(channel)
            .map(|members| {
                members
                    .iter()
                    .filter_map(|conn_id| state.endpoints.get(conn_id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn is_member(&self, conn_id: &str, channel: &str) -> bool {
        self.state
            .read()
            .await
            .channels
            .get(channel)
            .is_some_and(|members| members.contains(conn_id))
    }

    pub async fn channel_of(&self, conn_id: &str) -> Option<String> {
        self.state.read().await.membership.get(conn_id).cloned()
    }

    pub async fn endpoints(&self) -> Vec<Arc<Endpoint>> {
        self.state.read().await.endpoints.values().cloned().collect()
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read().await;
        RegistrySnapshot {
            clients: state.endpoints.len(),
            channels: state
                .channels
                .iter()
                .map(|(name, members)| (name.clone(), members.len()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn endpoint(conn_id: &str) -> (Arc<Endpoint>, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(8);
        let remote: SocketAddr = "127.0.0.1:40000".parse().expect("addr");
        (Arc::new(Endpoint::new(conn_id.to_string(), remote, tx)), rx)
    }

    async fn registered(registry: &ChannelRegistry, conn_id: &str) -> mpsc::Receiver<Message> {
        let (endpoint, rx) = endpoint(conn_id);
        registry.register(endpoint).await;
        rx
    }

    #[tokio::test]
    async fn join_is_idempotent_and_creates_channel() {
        let registry = ChannelRegistry::new();
        let _rx = registered(&registry, "conn-1").await;

        let first = registry.join("conn-1", "room1").await.expect("joined");
        assert_eq!(first.members, 1);
        assert!(!first.already_member);

        let second = registry.join("conn-1", "room1").await.expect("joined");
        assert_eq!(second.members, 1);
        assert!(second.already_member);

        assert_eq!(registry.members_of("room1").await.len(), 1);
        assert!(registry.is_member("conn-1", "room1").await);
    }

    #[tokio::test]
    async fn unknown_channel_has_no_members() {
        let registry = ChannelRegistry::new();
        assert!(registry.members_of("nowhere").await.is_empty());
        assert!(!registry.is_member("conn-9", "nowhere").await);
    }

    #[tokio::test]
    async fn unregistered_endpoint_cannot_join() {
        let registry = ChannelRegistry::new();
        assert_eq!(registry.join("conn-404", "room1").await, None);
        assert!(registry.snapshot().await.channels.is_empty());
    }

    #[tokio::test]
    async fn joining_another_channel_leaves_the_first() {
        let registry = ChannelRegistry::new();
        let _a = registered(&registry, "conn-1").await;
        let _b = registered(&registry, "conn-2").await;
        registry.join("conn-1", "room1").await;
        registry.join("conn-2", "room1").await;

        let moved = registry.join("conn-1", "room2").await.expect("joined");
        assert_eq!(
            moved.previous,
            Some(Departure {
                channel: "room1".to_string(),
                remaining: 1
            })
        );
        assert_eq!(registry.channel_of("conn-1").await.as_deref(), Some("room2"));

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.clients, 2);
        assert_eq!(snapshot.channels.get("room1"), Some(&1));
        assert_eq!(snapshot.channels.get("room2"), Some(&1));
    }

    #[tokio::test]
    async fn last_leave_removes_channel() {
        let registry = ChannelRegistry::new();
        let _a = registered(&registry, "conn-1").await;
        registry.join("conn-1", "room1").await;

        let departure = registry.unregister("conn-1").await;
        assert_eq!(
            departure,
            Some(Departure {
                channel: "room1".to_string(),
                remaining: 0
            })
        );
        assert_eq!(registry.snapshot().await, RegistrySnapshot::default());
        assert_eq!(registry.leave("conn-1").await, None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Join(usize, usize),
        Leave(usize),
        Reconnect(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            2 => (0..6usize, 0..3usize).prop_map(|(conn, channel)| Op::Join(conn, channel)),
            1 => (0..6usize).prop_map(Op::Leave),
            1 => (0..6usize).prop_map(Op::Reconnect),
        ]
    }

    proptest! {
        #[test]
        fn channels_exist_only_while_non_empty(ops in prop::collection::vec(op(), 0..200)) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async {
                let registry = ChannelRegistry::new();
                let channels = ["room1", "room2", "room3"];
                let mut receivers = Vec::new();
                for n in 0..6 {
                    receivers.push(registered(&registry, &format!("conn-{n}")).await);
                }

                for op in ops {
                    match op {
                        Op::Join(conn, channel) => {
                            registry.join(&format!("conn-{conn}"), channels[channel]).await;
                        }
                        Op::Leave(conn) => {
                            registry.leave(&format!("conn-{conn}")).await;
                        }
                        Op::Reconnect(conn) => {
                            let conn_id = format!("conn-{conn}");
                            registry.unregister(&conn_id).await;
                            receivers.push(registered(&registry, &conn_id).await);
                        }
                    }

                    let snapshot = registry.snapshot().await;
                    prop_assert_eq!(snapshot.clients, 6);
                    for (name, count) in &snapshot.channels {
                        prop_assert!(*count > 0, "channel {} is empty but still present", name);
                    }
                    for name in channels {
                        let members = registry.members_of(name).await.len();
                        prop_assert_eq!(snapshot.channels.get(name).copied().unwrap_or(0), members);
                    }
                }
                Ok(())
            })?;
        }
    }

    #[tokio::test]
    async fn close_wakes_eviction_waiter() {
        let (endpoint, mut rx) = endpoint("conn-1");
        endpoint.close(1001, "going away");
        tokio::time::timeout(std::time::Duration::from_secs(1), endpoint.evicted())
            .await
            .expect("eviction signalled");
        assert!(matches!(rx.recv().await, Some(Message::Close(Some(_)))));
    }
}
