use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{ChannelId, ConversationId, MessageId, SequenceNumber, TempId, UserId},
    protocol::MessagePayload,
};

/// How long a pending optimistic entry may claim an authoritative message
/// that matches its sender and text. Outside this window two identical texts
/// from the same sender are treated as distinct messages.
pub const ECHO_ACCEPTANCE_WINDOW_SECS: i64 = 30;

/// Identity of a stored message. A pending entry becomes confirmed only
/// through an explicit transition (`resolve_optimistic` or an echo match);
/// entries are never mutated in place across the two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIdentity {
    Pending {
        temp_id: TempId,
    },
    Confirmed {
        message_id: MessageId,
        sequence_number: SequenceNumber,
    },
}

impl MessageIdentity {
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            MessageIdentity::Confirmed { message_id, .. } => Some(*message_id),
            MessageIdentity::Pending { .. } => None,
        }
    }

    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        match self {
            MessageIdentity::Confirmed {
                sequence_number, ..
            } => Some(*sequence_number),
            MessageIdentity::Pending { .. } => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, MessageIdentity::Pending { .. })
    }
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub identity: MessageIdentity,
    pub sender_id: UserId,
    pub channel_id: Option<ChannelId>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
}

impl StoredMessage {
    /// Builds a confirmed entry from a wire message. Acknowledged messages
    /// always carry a sequence number; anything without one cannot be
    /// ordered and is rejected here.
    pub fn from_payload(payload: &MessagePayload) -> Option<Self> {
        let sequence_number = payload.sequence_number?;
        Some(Self {
            identity: MessageIdentity::Confirmed {
                message_id: payload.message_id,
                sequence_number,
            },
            sender_id: payload.sender_id.clone(),
            channel_id: payload.channel_id,
            content: payload.content.clone(),
            sent_at: payload.sent_at,
            sender_name: payload.sender_name.clone(),
            sender_avatar: payload.sender_avatar.clone(),
        })
    }

    pub fn pending(
        temp_id: TempId,
        sender_id: UserId,
        channel_id: Option<ChannelId>,
        content: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            identity: MessageIdentity::Pending { temp_id },
            sender_id,
            channel_id,
            content: content.into(),
            sent_at,
            sender_name: None,
            sender_avatar: None,
        }
    }

    pub fn sequence_number(&self) -> Option<SequenceNumber> {
        self.identity.sequence_number()
    }

    fn is_echo_of(&self, other: &StoredMessage) -> bool {
        self.identity.is_pending()
            && self.sender_id == other.sender_id
            && self.content == other.content
            && (other.sent_at - self.sent_at).num_seconds().abs() <= ECHO_ACCEPTANCE_WINDOW_SECS
    }
}

#[derive(Debug)]
struct ConversationState {
    messages: Vec<StoredMessage>,
    oldest_known_sequence: Option<SequenceNumber>,
    has_more_history: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            oldest_known_sequence: None,
            has_more_history: true,
        }
    }
}

impl ConversationState {
    fn contains_message(&self, message_id: MessageId) -> bool {
        self.messages
            .iter()
            .any(|m| m.identity.message_id() == Some(message_id))
    }

    /// Inserts while keeping confirmed entries in non-decreasing sequence
    /// order. Pending entries live at the tail in append order, so the
    /// insertion point for a confirmed entry is the end of the confirmed
    /// prefix with a smaller-or-equal sequence.
    fn insert_sorted(&mut self, message: StoredMessage) {
        match message.sequence_number() {
            None => self.messages.push(message),
            Some(sequence) => {
                let at = self
                    .messages
                    .partition_point(|m| m.sequence_number().is_some_and(|s| s <= sequence));
                self.messages.insert(at, message);
                self.oldest_known_sequence = Some(
                    self.oldest_known_sequence
                        .map_or(sequence, |current| current.min(sequence)),
                );
            }
        }
    }

    fn pending_position(&self, temp_id: TempId) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.identity == MessageIdentity::Pending { temp_id })
    }

    fn echo_position(&self, incoming: &StoredMessage) -> Option<usize> {
        self.messages.iter().position(|m| m.is_echo_of(incoming))
    }
}

/// Keyed store of per-conversation timelines. Exclusive owner of all message
/// state; callers get slices for rendering and mutate only through the
/// operations below.
#[derive(Debug, Default)]
pub struct ConversationStore {
    conversations: HashMap<ConversationId, ConversationState>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, conversation: &ConversationId) -> &[StoredMessage] {
        self.conversations
            .get(conversation)
            .map(|state| state.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Backfill cursor: sequence number of the earliest loaded message.
    pub fn cursor(&self, conversation: &ConversationId) -> Option<SequenceNumber> {
        self.conversations
            .get(conversation)
            .and_then(|state| state.oldest_known_sequence)
    }

    pub fn has_more_history(&self, conversation: &ConversationId) -> bool {
        self.conversations
            .get(conversation)
            .map(|state| state.has_more_history)
            .unwrap_or(true)
    }

    pub fn contains_message(&self, conversation: &ConversationId, message_id: MessageId) -> bool {
        self.conversations
            .get(conversation)
            .is_some_and(|state| state.contains_message(message_id))
    }

    fn entry(&mut self, conversation: &ConversationId) -> &mut ConversationState {
        self.conversations.entry(conversation.clone()).or_default()
    }

    /// Inserts unless a message with the same resolved identity already
    /// exists. A confirmed message that matches a still-pending optimistic
    /// entry (same sender and text inside the acceptance window) resolves
    /// that entry instead of landing next to it. Returns false on no-op.
    pub fn upsert(&mut self, conversation: &ConversationId, message: StoredMessage) -> bool {
        let state = self.entry(conversation);
        if let Some(message_id) = message.identity.message_id() {
            if state.contains_message(message_id) {
                return false;
            }
        }
        if !message.identity.is_pending() {
            if let Some(at) = state.echo_position(&message) {
                state.messages.remove(at);
            }
        }
        state.insert_sorted(message);
        true
    }

    /// Appends a locally originated entry at the tail, unordered until its
    /// acknowledgment arrives.
    pub fn push_pending(&mut self, conversation: &ConversationId, message: StoredMessage) {
        debug_assert!(message.identity.is_pending());
        self.entry(conversation).messages.push(message);
    }

    /// Replaces a pending entry with its authoritative counterpart, moving it
    /// into sequence position. Returns false if the temp id is unknown or the
    /// acknowledgment carries no sequence number.
    pub fn resolve_optimistic(
        &mut self,
        conversation: &ConversationId,
        temp_id: TempId,
        server_message: &MessagePayload,
    ) -> bool {
        let Some(confirmed) = StoredMessage::from_payload(server_message) else {
            return false;
        };
        let state = self.entry(conversation);
        let Some(at) = state.pending_position(temp_id) else {
            return false;
        };
        state.messages.remove(at);
        if !state.contains_message(server_message.message_id) {
            state.insert_sorted(confirmed);
        }
        true
    }

    /// Drops a pending entry after a terminal send failure.
    pub fn remove_optimistic(&mut self, conversation: &ConversationId, temp_id: TempId) -> bool {
        let state = self.entry(conversation);
        match state.pending_position(temp_id) {
            Some(at) => {
                state.messages.remove(at);
                true
            }
            None => false,
        }
    }

    /// Finds the conversation holding a pending entry that the given
    /// authoritative message is an echo of, and resolves it. Used for
    /// self-authored messages arriving on the push channel, which carry no
    /// conversation hint beyond what the pending entry already knows.
    pub fn resolve_pending_echo(&mut self, message: &MessagePayload) -> Option<ConversationId> {
        let incoming = StoredMessage::from_payload(message)?;
        let conversation = self
            .conversations
            .iter()
            .find(|(_, state)| state.echo_position(&incoming).is_some())
            .map(|(conversation, _)| conversation.clone())?;
        let state = self.entry(&conversation);
        if let Some(at) = state.echo_position(&incoming) {
            state.messages.remove(at);
            if !state.contains_message(message.message_id) {
                state.insert_sorted(incoming);
            }
        }
        Some(conversation)
    }

    /// Inserts a batch of strictly-older messages fetched by backfill and
    /// moves the cursor to the batch minimum. Entries at or above the current
    /// cursor are already covered by the live timeline and are skipped. A
    /// batch smaller than the requested page size marks the end of history.
    pub fn prepend_history(
        &mut self,
        conversation: &ConversationId,
        older: Vec<StoredMessage>,
        requested_page_size: usize,
    ) -> usize {
        let fetched = older.len();
        let state = self.entry(conversation);
        let cursor = state.oldest_known_sequence;
        let mut inserted = 0;
        for message in older {
            let Some(sequence) = message.sequence_number() else {
                continue;
            };
            if cursor.is_some_and(|c| sequence >= c) {
                continue;
            }
            if let Some(message_id) = message.identity.message_id() {
                if state.contains_message(message_id) {
                    continue;
                }
            }
            state.insert_sorted(message);
            inserted += 1;
        }
        if fetched < requested_page_size {
            state.has_more_history = false;
        }
        inserted
    }

    /// Authoritative full replacement of one timeline (snapshot push or
    /// initial load). Cursor and history flag are recomputed from scratch.
    pub fn replace_timeline(&mut self, conversation: &ConversationId, messages: Vec<StoredMessage>) {
        let state = self.entry(conversation);
        state.messages.clear();
        state.oldest_known_sequence = None;
        state.has_more_history = true;
        for message in messages {
            if let Some(message_id) = message.identity.message_id() {
                if state.contains_message(message_id) {
                    continue;
                }
            }
            state.insert_sorted(message);
        }
    }

    pub fn remove_conversation(&mut self, conversation: &ConversationId) -> bool {
        self.conversations.remove(conversation).is_some()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
