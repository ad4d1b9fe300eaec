use super::*;

use shared::domain::DeliveryStatus;

use crate::test_support::{at_minute, broadcast, direct, user};

fn session_for(me: &UserSummary) -> Session {
    Session::new("token-1", me.clone(), SessionLimits::default())
}

#[test]
fn seen_messages_evict_oldest_beyond_capacity() {
    let mut seen = SeenMessages::new(2);
    let (a, b, c) = (MessageId::new_v4(), MessageId::new_v4(), MessageId::new_v4());

    assert!(seen.insert(a));
    assert!(!seen.insert(a));
    assert!(seen.insert(b));
    assert!(seen.insert(c));

    assert_eq!(seen.len(), 2);
    assert!(!seen.contains(&a));
    assert!(seen.contains(&b) && seen.contains(&c));
}

#[test]
fn leaving_broadcast_mode_restores_last_peer() {
    let me = user("me");
    let peer = user("peer");
    let mut session = session_for(&me);

    assert!(session.select_peer(peer.id));
    assert!(session.set_broadcast_mode(true));
    assert!(session.selector().is_broadcast());
    assert!(!session.set_broadcast_mode(true));

    assert!(session.set_broadcast_mode(false));
    assert_eq!(session.selector(), &ConversationSelector::DirectWith(peer.id));
}

#[test]
fn leaving_broadcast_mode_without_peer_selects_none() {
    let me = user("me");
    let mut session = session_for(&me);

    session.set_broadcast_mode(true);
    session.set_broadcast_mode(false);
    assert_eq!(session.selector(), &ConversationSelector::None);
}

#[test]
fn broadcast_recipients_toggle_and_exclude_self() {
    let me = user("me");
    let other = user("other");
    let mut session = session_for(&me);

    assert!(!session.toggle_broadcast_recipient(other.id), "not in broadcast mode");
    session.set_broadcast_mode(true);
    assert!(!session.toggle_broadcast_recipient(me.id));
    assert!(session.toggle_broadcast_recipient(other.id));
    assert_eq!(
        session.selector(),
        &ConversationSelector::Broadcast(BTreeSet::from([other.id]))
    );
    assert!(session.toggle_broadcast_recipient(other.id));
    assert_eq!(
        session.selector(),
        &ConversationSelector::Broadcast(BTreeSet::new())
    );
}

#[test]
fn selecting_self_is_rejected() {
    let me = user("me");
    let mut session = session_for(&me);
    assert!(!session.select_peer(me.id));
    assert_eq!(session.selector(), &ConversationSelector::None);
}

#[test]
fn roster_excludes_self_and_keeps_received_presence() {
    let me = user("me");
    let alice = user("alice");
    let bob = UserSummary {
        is_online: true,
        ..user("bob")
    };
    let mut session = session_for(&me);
    session.presence.insert(alice.id, true);
    session.presence.insert(bob.id, false);

    session.set_roster(vec![me.clone(), alice.clone(), bob.clone()]);

    let flags: Vec<_> = session.roster().iter().map(|u| (u.id, u.is_online)).collect();
    assert_eq!(flags, vec![(alice.id, true), (bob.id, false)]);
}

#[test]
fn broadcast_history_is_newest_first_and_bounded() {
    let me = user("me");
    let limits = SessionLimits {
        broadcast_preview_len: 2,
        broadcast_history_capacity: 3,
        ..SessionLimits::default()
    };
    let mut session = Session::new("token-1", me.clone(), limits);

    let messages: Vec<_> = (0..4).map(|i| broadcast(me.id, &format!("b{i}"))).collect();
    for message in &messages {
        assert!(session.record_broadcast(message));
    }
    assert!(!session.record_broadcast(&messages[3]));

    let preview: Vec<_> = session.broadcast_preview().iter().map(|m| m.id).collect();
    assert_eq!(preview, vec![messages[3].id, messages[2].id]);
}

#[test]
fn merged_broadcast_page_is_sorted_and_marked_seen() {
    let me = user("me");
    let mut session = session_for(&me);

    let mut live = broadcast(me.id, "live");
    live.created_at = at_minute(30);
    session.record_broadcast(&live);

    let mut older = broadcast(me.id, "older");
    older.created_at = at_minute(10);
    let mut newer = broadcast(me.id, "newer");
    newer.created_at = at_minute(20);
    let stray = direct(me.id, user("x").id, "not a broadcast");

    session.merge_broadcast_history(vec![newer.clone(), older.clone(), live.clone(), stray.clone()]);

    let preview: Vec<_> = session.broadcast_preview().iter().map(|m| m.id).collect();
    assert_eq!(preview, vec![live.id, newer.id, older.id]);
    assert!(session.is_seen(&older.id));
    assert!(!session.is_seen(&stray.id));
}

#[test]
fn delivery_update_changes_status_only() {
    let me = user("me");
    let mut session = session_for(&me);
    let message = broadcast(me.id, "hello");
    session.record_broadcast(&message);

    let changed = session.apply_delivery(&DeliveryUpdate {
        message_id: message.id,
        status: DeliveryStatus::Read,
        updated_at: None,
    });

    assert!(changed);
    let stored = &session.broadcast_preview()[0];
    assert_eq!(stored.delivery_status, DeliveryStatus::Read);
    assert_eq!(stored.id, message.id);
    assert_eq!(stored.content, message.content);
}

#[test]
fn history_requests_are_serialized_per_conversation() {
    let me = user("me");
    let peer = user("peer");
    let mut session = session_for(&me);
    session.select_peer(peer.id);

    let (first, page) = session.begin_history_request(peer.id).expect("first page");
    assert_eq!(page, 1);
    assert!(session.begin_history_request(peer.id).is_none(), "already pending");

    assert!(session.finish_history_request(peer.id, first, 1, true));
    let (second, page) = session.begin_history_request(peer.id).expect("second page");
    assert_eq!(page, 2);

    assert!(session.finish_history_request(peer.id, second, 2, false));
    assert!(session.begin_history_request(peer.id).is_none(), "exhausted");
}

#[test]
fn history_for_previous_selection_is_rejected() {
    let me = user("me");
    let first = user("first");
    let second = user("second");
    let mut session = session_for(&me);

    session.select_peer(first.id);
    let (request, page) = session.begin_history_request(first.id).expect("request");
    session.select_peer(second.id);

    assert!(!session.finish_history_request(first.id, request, page, false));
}

#[test]
fn history_landing_in_broadcast_mode_releases_cursor() {
    let me = user("me");
    let peer = user("peer");
    let mut session = session_for(&me);
    session.select_peer(peer.id);
    let (request, page) = session.begin_history_request(peer.id).expect("request");

    session.set_broadcast_mode(true);
    assert!(!session.finish_history_request(peer.id, request, page, true));
    session.set_broadcast_mode(false);

    let cursor = session.history_cursor().expect("cursor");
    assert_eq!((cursor.page, cursor.pending), (0, None));
    let (_, page) = session.begin_history_request(peer.id).expect("request again");
    assert_eq!(page, 1);
}
