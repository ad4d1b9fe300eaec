use std::collections::HashSet;

use shared::{domain::UserId, protocol::MessagePayload};
use tracing::debug;

use crate::{
    session::{ConversationSelector, Session},
    view::{HistoryPlacement, View},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderDecision {
    RenderInline,
    RecordOnly,
    Ignore,
}

/// Classifies an inbound or echoed message and marks it seen.
///
/// The dedup gate runs before anything else. Broadcasts are recorded in the
/// broadcast history and always render inline, whatever conversation is
/// open. A direct message renders inline only when it belongs to the open
/// conversation.
pub fn route(session: &mut Session, message: &MessagePayload) -> RenderDecision {
    if !session.mark_seen(message.id) {
        return RenderDecision::Ignore;
    }

    if message.is_broadcast {
        session.record_broadcast(message);
        return RenderDecision::RenderInline;
    }

    match session.selector() {
        ConversationSelector::DirectWith(peer)
            if belongs_to(message, *peer, session.user_id()) =>
        {
            RenderDecision::RenderInline
        }
        _ => RenderDecision::RecordOnly,
    }
}

/// True when `{sender, recipient}` is exactly `{peer, me}`.
fn belongs_to(message: &MessagePayload, peer: UserId, me: UserId) -> bool {
    let Some(recipient) = message.recipient_id else {
        return false;
    };
    (message.sender_id == peer && recipient == me) || (message.sender_id == me && recipient == peer)
}

/// Routes a message and applies the decision to the view. Shared by the
/// push path and the send echo, so each id is drawn at most once.
pub fn deliver<V: View + ?Sized>(
    session: &mut Session,
    view: &mut V,
    message: &MessagePayload,
) -> RenderDecision {
    let decision = route(session, message);
    match decision {
        RenderDecision::RenderInline => {
            if message.is_broadcast {
                view.update_broadcast_preview(&session.broadcast_preview());
            }
            session.note_live(message);
            view.render_message(message);
        }
        RenderDecision::RecordOnly => view.record_message(message),
        RenderDecision::Ignore => {
            debug!(message_id = %message.id, "router: duplicate message suppressed")
        }
    }
    decision
}

/// Draws the first page of a conversation. `newest_first` is in the order
/// the history endpoint returns it; the view receives it oldest first,
/// followed by anything rendered live while the page was in flight.
pub fn hydrate<V: View + ?Sized>(
    session: &mut Session,
    view: &mut V,
    newest_first: Vec<MessagePayload>,
) -> usize {
    let mut batch_ids = HashSet::new();
    let mut ordered: Vec<MessagePayload> = newest_first
        .into_iter()
        .rev()
        .filter(|message| batch_ids.insert(message.id))
        .collect();

    let live_tail = std::mem::take(&mut session.live_tail);
    session.reset_conversation();
    for message in &ordered {
        session.mark_seen(message.id);
        session.visible.insert(message.id);
    }
    let from_history = ordered.len();
    for message in live_tail {
        if session.visible.insert(message.id) {
            session.live_tail.push(message.clone());
            ordered.push(message);
        }
    }

    view.render_history(&ordered, HistoryPlacement::Replace);
    from_history
}

/// Draws an older page above existing content, skipping anything already
/// on screen.
pub fn prepend_older<V: View + ?Sized>(
    session: &mut Session,
    view: &mut V,
    newest_first: Vec<MessagePayload>,
) -> usize {
    let mut ordered = Vec::new();
    for message in newest_first.into_iter().rev() {
        if session.visible.insert(message.id) {
            session.mark_seen(message.id);
            ordered.push(message);
        }
    }
    if !ordered.is_empty() {
        view.render_history(&ordered, HistoryPlacement::Prepend);
    }
    ordered.len()
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
