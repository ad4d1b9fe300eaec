use shared::{
    domain::UserId,
    protocol::{DeliveryUpdate, MessagePayload, UserSummary},
};

use crate::{connection::ConnectionState, session::ConversationSelector};

/// Where a batch of history goes relative to what is already shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryPlacement {
    /// Replaces the whole conversation view.
    Replace,
    /// Older page, drawn above existing content.
    Prepend,
}

/// Presentation collaborator. The engine calls these from its event loop
/// only, one at a time; implementations must not block.
pub trait View: Send {
    fn session_started(&mut self, user: &UserSummary);
    fn session_ended(&mut self);
    fn connection_changed(&mut self, state: ConnectionState, attempt: u32);

    /// Append a message to the live conversation view.
    fn render_message(&mut self, message: &MessagePayload);
    /// A message that belongs elsewhere; available later through history.
    fn record_message(&mut self, message: &MessagePayload);
    /// Messages in display order (oldest first).
    fn render_history(&mut self, messages: &[MessagePayload], placement: HistoryPlacement);
    fn clear_conversation(&mut self, selector: &ConversationSelector);
    fn selector_changed(&mut self, selector: &ConversationSelector);

    fn update_roster(&mut self, roster: &[UserSummary]);
    fn update_presence(&mut self, online: &[UserId]);
    /// Most recent broadcasts first.
    fn update_broadcast_preview(&mut self, preview: &[MessagePayload]);
    fn update_delivery(&mut self, update: &DeliveryUpdate);

    /// Non-fatal problem worth telling the user about.
    fn notice(&mut self, notice: &str);
}
