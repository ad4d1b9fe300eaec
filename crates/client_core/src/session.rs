use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use shared::{
    domain::{MessageId, UserId},
    protocol::{DeliveryUpdate, MessagePayload, UserSummary},
};

use crate::settings::ClientSettings;

/// The single active addressing target. Changed by user actions only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConversationSelector {
    #[default]
    None,
    DirectWith(UserId),
    Broadcast(BTreeSet<UserId>),
}

impl ConversationSelector {
    pub fn is_broadcast(&self) -> bool {
        matches!(self, Self::Broadcast(_))
    }

    pub fn peer(&self) -> Option<UserId> {
        match self {
            Self::DirectWith(peer) => Some(*peer),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLimits {
    pub history_page_size: u32,
    pub broadcast_fetch_limit: u32,
    pub broadcast_preview_len: usize,
    pub broadcast_history_capacity: usize,
    pub seen_message_capacity: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&ClientSettings::default())
    }
}

impl From<&ClientSettings> for SessionLimits {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            history_page_size: settings.history_page_size,
            broadcast_fetch_limit: settings.broadcast_fetch_limit,
            broadcast_preview_len: settings.broadcast_preview_len,
            broadcast_history_capacity: settings
                .broadcast_history_capacity
                .max(settings.broadcast_preview_len),
            seen_message_capacity: settings.seen_message_capacity.max(1),
        }
    }
}

/// Ids already surfaced to the view, bounded by evicting the oldest.
#[derive(Debug)]
pub struct SeenMessages {
    ids: HashSet<MessageId>,
    order: VecDeque<MessageId>,
    capacity: usize,
}

impl SeenMessages {
    pub fn new(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Returns false when the id was already present.
    pub fn insert(&mut self, id: MessageId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Paging state of the open direct conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCursor {
    pub peer: UserId,
    /// Last page applied; 0 until the first page lands.
    pub page: u32,
    pub has_more: bool,
    pub(crate) pending: Option<u64>,
}

/// State of one logged-in session. Built on login, dropped on logout.
#[derive(Debug)]
pub struct Session {
    credential: String,
    current_user: UserSummary,
    selector: ConversationSelector,
    last_peer: Option<UserId>,
    pub(crate) roster: Vec<UserSummary>,
    pub(crate) presence: HashMap<UserId, bool>,
    pub(crate) online: Vec<UserId>,
    pub(crate) seen: SeenMessages,
    broadcast_history: VecDeque<MessagePayload>,
    pub(crate) visible: HashSet<MessageId>,
    pub(crate) live_tail: Vec<MessagePayload>,
    history: Option<HistoryCursor>,
    next_history_request: u64,
    limits: SessionLimits,
}

impl Session {
    pub fn new(credential: impl Into<String>, current_user: UserSummary, limits: SessionLimits) -> Self {
        Self {
            credential: credential.into(),
            current_user,
            selector: ConversationSelector::None,
            last_peer: None,
            roster: Vec::new(),
            presence: HashMap::new(),
            online: Vec::new(),
            seen: SeenMessages::new(limits.seen_message_capacity),
            broadcast_history: VecDeque::new(),
            visible: HashSet::new(),
            live_tail: Vec::new(),
            history: None,
            next_history_request: 0,
            limits,
        }
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn current_user(&self) -> &UserSummary {
        &self.current_user
    }

    pub fn user_id(&self) -> UserId {
        self.current_user.id
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub fn selector(&self) -> &ConversationSelector {
        &self.selector
    }

    pub fn roster(&self) -> &[UserSummary] {
        &self.roster
    }

    pub fn online(&self) -> &[UserId] {
        &self.online
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.online.contains(&user_id)
    }

    pub fn history_cursor(&self) -> Option<&HistoryCursor> {
        self.history.as_ref()
    }

    /// Opens a direct conversation and resets the live view bookkeeping.
    /// Selecting oneself is rejected.
    pub fn select_peer(&mut self, peer: UserId) -> bool {
        if peer == self.user_id() {
            return false;
        }
        self.selector = ConversationSelector::DirectWith(peer);
        self.last_peer = Some(peer);
        self.reset_conversation();
        self.history = Some(HistoryCursor {
            peer,
            page: 0,
            has_more: true,
            pending: None,
        });
        true
    }

    /// Returns true when the selector changed. Leaving broadcast mode
    /// restores the last direct peer.
    pub fn set_broadcast_mode(&mut self, enabled: bool) -> bool {
        match (enabled, self.selector.is_broadcast()) {
            (true, false) => {
                self.selector = ConversationSelector::Broadcast(BTreeSet::new());
                true
            }
            (false, true) => {
                self.selector = self
                    .last_peer
                    .map(ConversationSelector::DirectWith)
                    .unwrap_or_default();
                true
            }
            _ => false,
        }
    }

    /// Adds or removes a broadcast recipient. Only meaningful in broadcast
    /// mode; returns true when the recipient set changed.
    pub fn toggle_broadcast_recipient(&mut self, user_id: UserId) -> bool {
        let me = self.user_id();
        let ConversationSelector::Broadcast(recipients) = &mut self.selector else {
            return false;
        };
        if user_id == me {
            return false;
        }
        if !recipients.remove(&user_id) {
            recipients.insert(user_id);
        }
        true
    }

    /// Replaces the roster. A user's flag comes from the last presence
    /// event received for them, falling back to the server's flag.
    pub fn set_roster(&mut self, users: Vec<UserSummary>) {
        let me = self.user_id();
        self.roster = users
            .into_iter()
            .filter(|user| user.id != me)
            .map(|mut user| {
                if let Some(online) = self.presence.get(&user.id) {
                    user.is_online = *online;
                }
                user
            })
            .collect();
    }

    pub fn is_seen(&self, id: &MessageId) -> bool {
        self.seen.contains(id)
    }

    pub fn mark_seen(&mut self, id: MessageId) -> bool {
        self.seen.insert(id)
    }

    pub(crate) fn note_live(&mut self, message: &MessagePayload) {
        if self.visible.insert(message.id) {
            self.live_tail.push(message.clone());
        }
    }

    pub(crate) fn reset_conversation(&mut self) {
        self.visible.clear();
        self.live_tail.clear();
    }

    /// Records a broadcast newest-first; ids already present are skipped.
    pub fn record_broadcast(&mut self, message: &MessagePayload) -> bool {
        if self
            .broadcast_history
            .iter()
            .any(|existing| existing.id == message.id)
        {
            return false;
        }
        self.broadcast_history.push_front(message.clone());
        self.broadcast_history
            .truncate(self.limits.broadcast_history_capacity.max(1));
        true
    }

    /// Merges a pulled page into the broadcast history. Entries stay
    /// newest first by creation time.
    pub fn merge_broadcast_history(&mut self, messages: Vec<MessagePayload>) {
        for message in messages.into_iter().filter(|message| message.is_broadcast) {
            if self
                .broadcast_history
                .iter()
                .any(|existing| existing.id == message.id)
            {
                continue;
            }
            self.seen.insert(message.id);
            self.broadcast_history.push_back(message);
        }
        self.broadcast_history
            .make_contiguous()
            .sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.broadcast_history
            .truncate(self.limits.broadcast_history_capacity.max(1));
    }

    pub fn broadcast_preview(&self) -> Vec<MessagePayload> {
        self.broadcast_history
            .iter()
            .take(self.limits.broadcast_preview_len)
            .cloned()
            .collect()
    }

    /// Applies a delivery status to any retained copy. Identity fields are
    /// never touched.
    pub fn apply_delivery(&mut self, update: &DeliveryUpdate) -> bool {
        let mut changed = false;
        let retained = self
            .broadcast_history
            .iter_mut()
            .chain(self.live_tail.iter_mut());
        for message in retained.filter(|message| message.id == update.message_id) {
            message.delivery_status = update.status;
            changed = true;
        }
        changed
    }

    pub(crate) fn begin_history_request(&mut self, peer: UserId) -> Option<(u64, u32)> {
        let cursor = self.history.as_mut().filter(|cursor| cursor.peer == peer)?;
        if cursor.pending.is_some() || (cursor.page > 0 && !cursor.has_more) {
            return None;
        }
        self.next_history_request += 1;
        cursor.pending = Some(self.next_history_request);
        Some((self.next_history_request, cursor.page + 1))
    }

    /// Accepts a finished history request if it is still the one the open
    /// conversation is waiting for. The cursor is released either way, so a
    /// page that lands while the conversation is hidden never blocks the
    /// next request.
    pub(crate) fn finish_history_request(
        &mut self,
        peer: UserId,
        request: u64,
        page: u32,
        has_more: bool,
    ) -> bool {
        let open = self.selector == ConversationSelector::DirectWith(peer);
        let Some(cursor) = self
            .history
            .as_mut()
            .filter(|cursor| cursor.peer == peer && cursor.pending == Some(request))
        else {
            return false;
        };
        cursor.pending = None;
        if !open {
            return false;
        }
        cursor.page = page;
        cursor.has_more = has_more;
        true
    }

    pub(crate) fn abandon_history_request(&mut self, request: u64) {
        if let Some(cursor) = self
            .history
            .as_mut()
            .filter(|cursor| cursor.pending == Some(request))
        {
            cursor.pending = None;
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
