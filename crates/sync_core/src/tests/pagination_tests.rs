use super::*;
use chrono::{TimeZone, Utc};
use shared::domain::{MessageId, TempId, UserId};

fn conversation() -> ConversationId {
    ConversationId::Channel(ChannelId(7))
}

fn confirmed(sequence: SequenceNumber) -> StoredMessage {
    StoredMessage {
        identity: MessageIdentity::Confirmed {
            message_id: MessageId(sequence as i64),
            sequence_number: sequence,
        },
        sender_id: UserId::new("alice"),
        channel_id: Some(ChannelId(7)),
        content: format!("message {sequence}"),
        sent_at: Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        sender_name: None,
        sender_avatar: None,
    }
}

fn seeded_store(sequences: std::ops::RangeInclusive<SequenceNumber>) -> ConversationStore {
    let mut store = ConversationStore::new();
    for sequence in sequences {
        store.upsert(&conversation(), confirmed(sequence));
    }
    store
}

#[test]
fn empty_timeline_cannot_begin_a_fetch() {
    let mut controller = PaginationController::new(DEFAULT_PAGE_SIZE);
    let store = ConversationStore::new();
    assert!(controller.try_begin(&conversation(), &store).is_none());
    assert!(!controller.is_fetching());
}

#[test]
fn try_begin_parameterizes_the_fetch_from_the_cursor() {
    let mut controller = PaginationController::new(DEFAULT_PAGE_SIZE);
    let store = seeded_store(50..=60);

    let request = controller.try_begin(&conversation(), &store).unwrap();

    assert_eq!(request.conversation, conversation());
    assert_eq!(request.channel_id, ChannelId(7));
    assert_eq!(request.before_sequence, 50);
    assert_eq!(request.page_size, DEFAULT_PAGE_SIZE);
    assert!(controller.is_fetching());
}

#[test]
fn a_second_trigger_is_ignored_while_fetching() {
    let mut controller = PaginationController::new(DEFAULT_PAGE_SIZE);
    let store = seeded_store(50..=60);

    assert!(controller.try_begin(&conversation(), &store).is_some());
    assert!(controller.try_begin(&conversation(), &store).is_none());
}

#[test]
fn complete_applies_the_page_and_reports_the_anchor() {
    let mut controller = PaginationController::new(DEFAULT_PAGE_SIZE);
    let mut store = seeded_store(50..=60);
    let request = controller.try_begin(&conversation(), &store).unwrap();
    let older: Vec<_> = (42..50).map(confirmed).collect();

    let outcome = controller.complete(&mut store, &request, older);

    assert_eq!(outcome.prepended, 8);
    assert!(!outcome.has_more_history);
    assert_eq!(
        outcome.anchor,
        Some(MessageIdentity::Confirmed {
            message_id: MessageId(50),
            sequence_number: 50,
        })
    );
    assert!(!controller.is_fetching());
    assert_eq!(store.cursor(&conversation()), Some(42));
}

#[test]
fn exhausted_history_stops_triggering() {
    let mut controller = PaginationController::new(DEFAULT_PAGE_SIZE);
    let mut store = seeded_store(50..=60);
    let request = controller.try_begin(&conversation(), &store).unwrap();
    controller.complete(&mut store, &request, (42..50).map(confirmed).collect());

    assert!(controller.try_begin(&conversation(), &store).is_none());
}

#[test]
fn fail_rearms_the_trigger_without_touching_the_store() {
    let mut controller = PaginationController::new(DEFAULT_PAGE_SIZE);
    let store = seeded_store(50..=60);
    assert!(controller.try_begin(&conversation(), &store).is_some());

    controller.fail();

    assert!(!controller.is_fetching());
    assert_eq!(store.get(&conversation()).len(), 11);
    let retry = controller.try_begin(&conversation(), &store).unwrap();
    assert_eq!(retry.before_sequence, 50);
}

#[test]
fn pending_only_timeline_cannot_page() {
    let mut controller = PaginationController::new(DEFAULT_PAGE_SIZE);
    let mut store = ConversationStore::new();
    let dm = ConversationId::Direct(UserId::new("bob"));
    store.push_pending(
        &dm,
        StoredMessage::pending(
            TempId::generate(),
            UserId::new("me"),
            None,
            "hi",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ),
    );

    assert!(controller.try_begin(&dm, &store).is_none());
    assert!(!controller.is_fetching());
}

#[test]
fn dm_timeline_without_channel_ids_cannot_page() {
    let mut controller = PaginationController::new(DEFAULT_PAGE_SIZE);
    let mut store = ConversationStore::new();
    let dm = ConversationId::Direct(UserId::new("bob"));
    let mut message = confirmed(5);
    message.channel_id = None;
    store.upsert(&dm, message);

    assert!(controller.try_begin(&dm, &store).is_none());
}
