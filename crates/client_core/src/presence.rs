//! Presence reconciliation.
//!
//! The online set and the roster flags are updated independently: a roster
//! reload may have put them out of step, so the flag is written even when
//! the set membership did not change.

use shared::{domain::UserId, protocol::UserStatus};
use tracing::debug;

use crate::session::Session;

/// Applies one presence event. Returns true when the online set changed.
pub fn apply(session: &mut Session, status: &UserStatus) -> bool {
    if status.user_id == session.user_id() {
        debug!(user_id = %status.user_id, "presence: ignoring event for current user");
        return false;
    }

    session.presence.insert(status.user_id, status.is_online);
    set_roster_flag(session, status.user_id, status.is_online);

    let position = session.online.iter().position(|id| *id == status.user_id);
    match (status.is_online, position) {
        (true, None) => {
            session.online.push(status.user_id);
            true
        }
        (false, Some(index)) => {
            session.online.remove(index);
            true
        }
        _ => false,
    }
}

/// Replaces the online set with a pulled snapshot. Every user not listed
/// is treated as having gone offline.
pub fn reconcile_snapshot(session: &mut Session, statuses: &[UserStatus]) {
    let me = session.user_id();
    let mut online: Vec<UserId> = Vec::new();
    for status in statuses {
        if status.is_online && status.user_id != me && !online.contains(&status.user_id) {
            online.push(status.user_id);
        }
    }

    let known: Vec<UserId> = session
        .roster
        .iter()
        .map(|user| user.id)
        .chain(session.online.iter().copied())
        .chain(session.presence.keys().copied())
        .collect();
    for user_id in known {
        session.presence.insert(user_id, false);
    }
    for user_id in &online {
        session.presence.insert(*user_id, true);
    }
    for user in &mut session.roster {
        user.is_online = online.contains(&user.id);
    }
    session.online = online;
}

fn set_roster_flag(session: &mut Session, user_id: UserId, is_online: bool) {
    if let Some(user) = session.roster.iter_mut().find(|user| user.id == user_id) {
        user.is_online = is_online;
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
