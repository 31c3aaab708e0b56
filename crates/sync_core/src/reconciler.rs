use shared::{
    domain::{ChannelId, ConversationId, UserId},
    protocol::MessagePayload,
};
use tracing::warn;

use crate::{
    roster::Roster,
    store::{ConversationStore, StoredMessage},
};

/// What the UI collaborator should do after one message was processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Admitted into the currently viewed conversation.
    RenderNow(ConversationId),
    /// Admitted into a background conversation.
    UnreadIncrement(ConversationId),
    /// A pending optimistic entry was upgraded by its authoritative echo.
    ResolvedPending(ConversationId),
    /// Already present; nothing changed.
    Duplicate,
    /// Unattributable or unorderable; dropped with a log line.
    Discarded,
}

/// Classifies and admits inbound message events into the store. Carries the
/// local identity, so it can only exist after identity resolution.
#[derive(Debug)]
pub struct Reconciler {
    local_user: UserId,
}

impl Reconciler {
    pub fn new(local_user: UserId) -> Self {
        Self { local_user }
    }

    pub fn local_user(&self) -> &UserId {
        &self.local_user
    }

    /// A message naming a channel the roster knows is group traffic;
    /// everything else is a DM keyed by its sender.
    pub fn classify_target(&self, roster: &Roster, message: &MessagePayload) -> ConversationId {
        match message.channel_id {
            Some(channel_id) if roster.is_known_channel(channel_id) => {
                ConversationId::Channel(channel_id)
            }
            _ => ConversationId::Direct(message.sender_id.clone()),
        }
    }

    /// Incremental ingestion mode: admit one message from the private push
    /// queue into the store, deduplicated against the target timeline.
    pub fn append_incremental(
        &self,
        store: &mut ConversationStore,
        roster: &Roster,
        active: Option<&ConversationId>,
        message: &MessagePayload,
    ) -> IngestOutcome {
        if message.sender_id == self.local_user {
            return self.ingest_own_message(store, roster, active, message);
        }

        let target = self.classify_target(roster, message);
        if store.contains_message(&target, message.message_id) {
            return IngestOutcome::Duplicate;
        }
        let Some(stored) = StoredMessage::from_payload(message) else {
            warn!(
                message_id = message.message_id.0,
                "discarding pushed message without a sequence number"
            );
            return IngestOutcome::Discarded;
        };
        if !store.upsert(&target, stored) {
            return IngestOutcome::Duplicate;
        }
        if active == Some(&target) {
            IngestOutcome::RenderNow(target)
        } else {
            IngestOutcome::UnreadIncrement(target)
        }
    }

    /// Batches are admitted element-wise, oldest first, so relative order is
    /// preserved even though each element is deduplicated independently.
    pub fn append_batch(
        &self,
        store: &mut ConversationStore,
        roster: &Roster,
        active: Option<&ConversationId>,
        messages: &[MessagePayload],
    ) -> Vec<IngestOutcome> {
        messages
            .iter()
            .map(|message| self.append_incremental(store, roster, active, message))
            .collect()
    }

    /// Snapshot ingestion mode: the broadcast channel delivers the full
    /// timeline for a channel, which replaces whatever was cached.
    pub fn replace_snapshot(
        &self,
        store: &mut ConversationStore,
        channel_id: ChannelId,
        messages: &[MessagePayload],
    ) -> ConversationId {
        let conversation = ConversationId::Channel(channel_id);
        let stored = messages
            .iter()
            .filter_map(StoredMessage::from_payload)
            .collect();
        store.replace_timeline(&conversation, stored);
        conversation
    }

    /// A self-authored message from the push channel is usually the echo of
    /// an optimistic send and resolves the matching pending entry. When no
    /// pending entry matches (the ack was lost, or the same identity is
    /// active in a second session) the message is admitted like any other
    /// rather than dropped, as long as it can be attributed to a
    /// conversation. A self-authored DM with no channel id and no pending
    /// counterpart names only ourselves, so it cannot be attributed and is
    /// discarded.
    fn ingest_own_message(
        &self,
        store: &mut ConversationStore,
        roster: &Roster,
        active: Option<&ConversationId>,
        message: &MessagePayload,
    ) -> IngestOutcome {
        if let Some(conversation) = store.resolve_pending_echo(message) {
            return IngestOutcome::ResolvedPending(conversation);
        }

        let target = match message.channel_id {
            Some(channel_id) if roster.is_known_channel(channel_id) => {
                ConversationId::Channel(channel_id)
            }
            _ => {
                warn!(
                    message_id = message.message_id.0,
                    "discarding unattributable self-authored message"
                );
                return IngestOutcome::Discarded;
            }
        };
        if store.contains_message(&target, message.message_id) {
            return IngestOutcome::Duplicate;
        }
        let Some(stored) = StoredMessage::from_payload(message) else {
            return IngestOutcome::Discarded;
        };
        if !store.upsert(&target, stored) {
            return IngestOutcome::Duplicate;
        }
        if active == Some(&target) {
            IngestOutcome::RenderNow(target)
        } else {
            IngestOutcome::UnreadIncrement(target)
        }
    }
}

#[cfg(test)]
#[path = "tests/reconciler_tests.rs"]
mod tests;
