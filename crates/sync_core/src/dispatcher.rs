use shared::{
    domain::{ChannelId, UserId},
    protocol::{MembershipUpdate, MessagePayload, PushFrame},
};

use crate::error::SyncError;

pub const BROADCAST_TOPIC_PREFIX: &str = "/topic/chat-";
const PRIVATE_QUEUE_PREFIX: &str = "/queue/chat-user-";
const UPDATES_QUEUE_PREFIX: &str = "/queue/updates-user-";

/// One routed push event. Snapshot and incremental are distinct ingestion
/// modes: the broadcast topic replaces a channel's timeline wholesale, the
/// private queue appends.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    Snapshot {
        channel_id: ChannelId,
        messages: Vec<MessagePayload>,
    },
    /// Batch from the private queue, oldest first.
    Incremental(Vec<MessagePayload>),
    Membership(MembershipUpdate),
}

/// Routes raw push frames to typed events. The private destinations embed
/// the local user id, so a dispatcher cannot exist before identity
/// resolution has completed.
#[derive(Debug)]
pub struct RealtimeDispatcher {
    private_queue: String,
    updates_queue: String,
}

impl RealtimeDispatcher {
    pub fn new(local_user: &UserId) -> Self {
        Self {
            private_queue: format!("{PRIVATE_QUEUE_PREFIX}{local_user}"),
            updates_queue: format!("{UPDATES_QUEUE_PREFIX}{local_user}"),
        }
    }

    pub fn route(&self, frame: PushFrame) -> Result<InboundEvent, SyncError> {
        if let Some(raw_channel) = frame.destination.strip_prefix(BROADCAST_TOPIC_PREFIX) {
            let channel_id = raw_channel.parse::<i64>().map_err(|_| {
                SyncError::MalformedResponse(format!(
                    "bad broadcast destination: {}",
                    frame.destination
                ))
            })?;
            let messages = serde_json::from_value(frame.body)
                .map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
            return Ok(InboundEvent::Snapshot {
                channel_id: ChannelId(channel_id),
                messages,
            });
        }

        if frame.destination == self.private_queue {
            // The backend pushes a list of recent messages on subscribe and
            // single messages afterwards; accept both shapes.
            let messages = match serde_json::from_value::<Vec<MessagePayload>>(frame.body.clone()) {
                Ok(batch) => batch,
                Err(_) => vec![serde_json::from_value::<MessagePayload>(frame.body)
                    .map_err(|err| SyncError::MalformedResponse(err.to_string()))?],
            };
            return Ok(InboundEvent::Incremental(messages));
        }

        if frame.destination == self.updates_queue {
            let update = serde_json::from_value(frame.body)
                .map_err(|err| SyncError::MalformedResponse(err.to_string()))?;
            return Ok(InboundEvent::Membership(update));
        }

        Err(SyncError::MalformedResponse(format!(
            "unknown destination: {}",
            frame.destination
        )))
    }
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
