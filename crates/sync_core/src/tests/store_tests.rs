use super::*;
use chrono::{Duration, TimeZone};

fn ts() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
}

fn conversation() -> ConversationId {
    ConversationId::Channel(ChannelId(1))
}

fn confirmed(id: i64, sequence: SequenceNumber, sender: &str, text: &str) -> StoredMessage {
    StoredMessage {
        identity: MessageIdentity::Confirmed {
            message_id: MessageId(id),
            sequence_number: sequence,
        },
        sender_id: UserId::new(sender),
        channel_id: Some(ChannelId(1)),
        content: text.to_string(),
        sent_at: ts(),
        sender_name: None,
        sender_avatar: None,
    }
}

fn ack(id: i64, sequence: SequenceNumber, sender: &str, text: &str) -> MessagePayload {
    MessagePayload {
        message_id: MessageId(id),
        channel_id: Some(ChannelId(1)),
        sender_id: UserId::new(sender),
        sender_name: None,
        sender_avatar: None,
        sequence_number: Some(sequence),
        content: text.to_string(),
        sent_at: ts(),
    }
}

fn sequences(store: &ConversationStore, conversation: &ConversationId) -> Vec<SequenceNumber> {
    store
        .get(conversation)
        .iter()
        .filter_map(StoredMessage::sequence_number)
        .collect()
}

#[test]
fn upsert_is_idempotent_by_message_id() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    assert!(store.upsert(&conversation, confirmed(1, 50, "alice", "hi")));
    assert!(!store.upsert(&conversation, confirmed(1, 50, "alice", "hi")));
    assert_eq!(store.get(&conversation).len(), 1);
}

#[test]
fn timeline_stays_sorted_for_any_arrival_order() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    for (id, sequence) in [(5, 55), (2, 52), (9, 60), (1, 50), (7, 58)] {
        store.upsert(&conversation, confirmed(id, sequence, "alice", "m"));
    }
    assert_eq!(sequences(&store, &conversation), vec![50, 52, 55, 58, 60]);
    assert_eq!(store.cursor(&conversation), Some(50));
}

#[test]
fn interleaved_backfill_and_push_preserve_ordering() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    for sequence in 50..=55u64 {
        store.upsert(
            &conversation,
            confirmed(sequence as i64, sequence, "alice", "m"),
        );
    }
    // Live push lands while a backfill page is still in flight.
    store.upsert(&conversation, confirmed(56, 56, "bob", "live"));
    let older: Vec<_> = (45..50u64)
        .map(|sequence| confirmed(sequence as i64, sequence, "alice", "old"))
        .collect();
    store.prepend_history(&conversation, older, 5);
    store.upsert(&conversation, confirmed(57, 57, "bob", "live"));

    assert_eq!(sequences(&store, &conversation), (45..=57).collect::<Vec<_>>());
}

#[test]
fn short_backfill_page_ends_history() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    for sequence in 50..=60u64 {
        store.upsert(
            &conversation,
            confirmed(sequence as i64, sequence, "alice", "m"),
        );
    }
    assert!(store.has_more_history(&conversation));

    // 8 items against a requested page of 10.
    let older: Vec<_> = (42..50u64)
        .map(|sequence| confirmed(sequence as i64, sequence, "alice", "old"))
        .collect();
    let inserted = store.prepend_history(&conversation, older, 10);

    assert_eq!(inserted, 8);
    assert_eq!(store.cursor(&conversation), Some(42));
    assert!(!store.has_more_history(&conversation));
    assert_eq!(sequences(&store, &conversation), (42..=60).collect::<Vec<_>>());

    // Stays false across further (empty) fetches.
    store.prepend_history(&conversation, Vec::new(), 10);
    assert!(!store.has_more_history(&conversation));
}

#[test]
fn prepend_skips_entries_at_or_above_the_cursor() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    store.upsert(&conversation, confirmed(50, 50, "alice", "m"));

    let batch = vec![
        confirmed(49, 49, "alice", "old"),
        confirmed(50, 50, "alice", "already cached"),
        confirmed(51, 51, "alice", "newer than cursor"),
    ];
    let inserted = store.prepend_history(&conversation, batch, 10);

    assert_eq!(inserted, 1);
    assert_eq!(sequences(&store, &conversation), vec![49, 50]);
}

#[test]
fn resolve_optimistic_upgrades_pending_in_place() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    store.upsert(&conversation, confirmed(60, 60, "bob", "earlier"));

    let temp_id = TempId::generate();
    store.push_pending(
        &conversation,
        StoredMessage::pending(temp_id, UserId::new("me"), Some(ChannelId(1)), "hi", ts()),
    );
    assert!(store.resolve_optimistic(&conversation, temp_id, &ack(61, 61, "me", "hi")));

    let timeline = store.get(&conversation);
    assert_eq!(timeline.len(), 2);
    let last = timeline.last().unwrap();
    assert_eq!(last.content, "hi");
    assert_eq!(last.sequence_number(), Some(61));
    assert!(!last.identity.is_pending());
}

#[test]
fn resolve_optimistic_with_unknown_temp_id_is_a_noop() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    assert!(!store.resolve_optimistic(&conversation, TempId::generate(), &ack(61, 61, "me", "hi")));
    assert!(store.get(&conversation).is_empty());
}

#[test]
fn authoritative_echo_claims_the_pending_entry() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    let temp_id = TempId::generate();
    store.push_pending(
        &conversation,
        StoredMessage::pending(temp_id, UserId::new("me"), Some(ChannelId(1)), "hi", ts()),
    );

    assert!(store.upsert(&conversation, confirmed(61, 61, "me", "hi")));

    let timeline = store.get(&conversation);
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].sequence_number(), Some(61));
}

#[test]
fn echo_outside_acceptance_window_is_a_distinct_message() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    store.push_pending(
        &conversation,
        StoredMessage::pending(
            TempId::generate(),
            UserId::new("me"),
            Some(ChannelId(1)),
            "hi",
            ts() - Duration::seconds(ECHO_ACCEPTANCE_WINDOW_SECS + 10),
        ),
    );

    store.upsert(&conversation, confirmed(61, 61, "me", "hi"));

    assert_eq!(store.get(&conversation).len(), 2);
}

#[test]
fn resolve_pending_echo_locates_the_owning_conversation() {
    let mut store = ConversationStore::new();
    let dm = ConversationId::Direct(UserId::new("bob"));
    let temp_id = TempId::generate();
    store.push_pending(
        &dm,
        StoredMessage::pending(temp_id, UserId::new("me"), None, "hi bob", ts()),
    );
    store.upsert(&conversation(), confirmed(5, 5, "alice", "unrelated"));

    let mut echo = ack(70, 70, "me", "hi bob");
    echo.channel_id = None;
    assert_eq!(store.resolve_pending_echo(&echo), Some(dm.clone()));

    let timeline = store.get(&dm);
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].sequence_number(), Some(70));
}

#[test]
fn remove_optimistic_drops_the_failed_entry() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    let temp_id = TempId::generate();
    store.push_pending(
        &conversation,
        StoredMessage::pending(temp_id, UserId::new("me"), Some(ChannelId(1)), "hi", ts()),
    );

    assert!(store.remove_optimistic(&conversation, temp_id));
    assert!(store.get(&conversation).is_empty());
    assert!(!store.remove_optimistic(&conversation, temp_id));
}

#[test]
fn replace_timeline_recomputes_cursor_and_rearms_history() {
    let mut store = ConversationStore::new();
    let conversation = conversation();
    for sequence in 50..=60u64 {
        store.upsert(
            &conversation,
            confirmed(sequence as i64, sequence, "alice", "m"),
        );
    }
    store.prepend_history(&conversation, Vec::new(), 10);
    assert!(!store.has_more_history(&conversation));

    store.replace_timeline(
        &conversation,
        vec![confirmed(100, 100, "bob", "a"), confirmed(101, 101, "bob", "b")],
    );

    assert_eq!(sequences(&store, &conversation), vec![100, 101]);
    assert_eq!(store.cursor(&conversation), Some(100));
    assert!(store.has_more_history(&conversation));
}

#[test]
fn unknown_conversation_reads_as_empty() {
    let store = ConversationStore::new();
    assert!(store.get(&ConversationId::Direct(UserId::new("nobody"))).is_empty());
    assert_eq!(store.cursor(&conversation()), None);
}
