use crate::registry::{ChannelRegistry, Departure, Endpoint};
use figma_relay_core::protocol::member_left;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: Vec<String>,
}

/// Delivers `text` to every member of `channel` except `sender`.
///
/// Members whose queue is closed or full are unregistered once the pass is
/// over; the remaining members still receive the message.
pub async fn broadcast(
    registry: &ChannelRegistry,
    channel: &str,
    text: &str,
    sender: Option<&str>,
) -> BroadcastReport {
    let members = registry.members_of(channel).await;
    if members.is_empty() {
        warn!(event = "broadcast_no_channel", channel = channel);
        return BroadcastReport::default();
    }

    let mut report = BroadcastReport::default();
    let mut failed: Vec<Arc<Endpoint>> = Vec::new();
    for member in members {
        if Some(member.conn_id.as_str()) == sender {
            continue;
        }
        match member.try_send_text(text) {
            Ok(()) => report.delivered += 1,
            Err(failure) => {
                warn!(
                    event = "delivery_failed",
                    conn_id = %member.conn_id,
                    channel = channel,
                    reason = %failure
                );
                failed.push(member);
            }
        }
    }

    for member in failed {
        member.close(1011, "delivery failed");
        if let Some(departure) = registry.unregister(&member.conn_id).await {
            announce_departure(registry, &departure).await;
        }
        report.failed.push(member.conn_id.clone());
    }

    debug!(
        event = "broadcast",
        channel = channel,
        delivered = report.delivered,
        failed = report.failed.len()
    );
    report
}

/// Tells the members left behind how many remain. Best effort: failures
/// here are logged and left for the next broadcast to clean up.
pub async fn announce_departure(registry: &ChannelRegistry, departure: &Departure) {
    if departure.remaining == 0 {
        info!(event = "channel_removed", channel = %departure.channel);
        return;
    }
    let notice = member_left(&departure.channel, departure.remaining).to_string();
    for member in registry.members_of(&departure.channel).await {
        if let Err(failure) = member.try_send_text(&notice) {
            warn!(
                event = "departure_notice_failed",
                conn_id = %member.conn_id,
                channel = %departure.channel,
                reason = %failure
            );
        }
    }
}
