use shared::domain::{ChannelId, ConversationId, SequenceNumber};

use crate::store::{ConversationStore, MessageIdentity, StoredMessage};

pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Parameters for one backfill fetch, issued on entry to `FetchingHistory`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillRequest {
    pub conversation: ConversationId,
    pub channel_id: ChannelId,
    pub before_sequence: SequenceNumber,
    pub page_size: usize,
}

/// Result of applying a backfill page, including what the viewport needs to
/// stay visually anchored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillOutcome {
    pub conversation: ConversationId,
    pub prepended: usize,
    pub has_more_history: bool,
    /// Identity of the entry that was at the top before the prepend; the
    /// viewport scrolls back to it so the inserted content height is
    /// invisible.
    pub anchor: Option<MessageIdentity>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum FetchState {
    Idle,
    FetchingHistory { conversation: ConversationId },
}

/// Drives backward history fetch from the scroll-top trigger. One global
/// flag, not per-conversation: only the active conversation can be fetching,
/// matching the single-viewport UI.
#[derive(Debug)]
pub struct PaginationController {
    state: FetchState,
    page_size: usize,
}

impl PaginationController {
    pub fn new(page_size: usize) -> Self {
        Self {
            state: FetchState::Idle,
            page_size,
        }
    }

    pub fn is_fetching(&self) -> bool {
        matches!(self.state, FetchState::FetchingHistory { .. })
    }

    /// Idle -> FetchingHistory, if the active conversation has a loaded
    /// message, more history is available, and the earliest entry carries a
    /// channel id to parameterize the fetch (DM-only timelines without one
    /// cannot page). Returns None while a fetch is already in flight.
    pub fn try_begin(
        &mut self,
        active: &ConversationId,
        store: &ConversationStore,
    ) -> Option<BackfillRequest> {
        if self.is_fetching() {
            return None;
        }
        let timeline = store.get(active);
        let earliest = timeline.first()?;
        if !store.has_more_history(active) {
            return None;
        }
        let before_sequence = store.cursor(active)?;
        let channel_id = earliest.channel_id?;
        self.state = FetchState::FetchingHistory {
            conversation: active.clone(),
        };
        Some(BackfillRequest {
            conversation: active.clone(),
            channel_id,
            before_sequence,
            page_size: self.page_size,
        })
    }

    /// FetchingHistory -> Idle with the page applied to the store.
    pub fn complete(
        &mut self,
        store: &mut ConversationStore,
        request: &BackfillRequest,
        older: Vec<StoredMessage>,
    ) -> BackfillOutcome {
        let anchor = store
            .get(&request.conversation)
            .first()
            .map(|message| message.identity);
        let prepended = store.prepend_history(&request.conversation, older, request.page_size);
        self.state = FetchState::Idle;
        BackfillOutcome {
            conversation: request.conversation.clone(),
            prepended,
            has_more_history: store.has_more_history(&request.conversation),
            anchor,
        }
    }

    /// FetchingHistory -> Idle without store mutation; the scroll trigger
    /// re-arms on the next qualifying event.
    pub fn fail(&mut self) {
        self.state = FetchState::Idle;
    }
}

#[cfg(test)]
#[path = "tests/pagination_tests.rs"]
mod tests;
