//! Line-oriented rendering of engine callbacks.

use std::collections::HashMap;

use client_core::{ConnectionState, ConversationSelector, HistoryPlacement, View};
use shared::{
    domain::{MessageType, UserId},
    protocol::{DeliveryUpdate, MessagePayload, UserSummary},
};

#[derive(Default)]
pub struct TerminalView {
    me: Option<UserId>,
    names: HashMap<UserId, String>,
}

impl TerminalView {
    fn name(&self, user_id: UserId) -> String {
        if Some(user_id) == self.me {
            return "you".into();
        }
        self.names
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| user_id.to_string())
    }

    pub(crate) fn format_message(&self, message: &MessagePayload) -> String {
        let time = message.created_at.format("%H:%M");
        let from = if message.sender_username.is_empty() || Some(message.sender_id) == self.me {
            self.name(message.sender_id)
        } else {
            message.sender_username.clone()
        };
        let target = match (message.is_broadcast, message.recipient_id) {
            (true, _) => "everyone".to_string(),
            (false, Some(recipient)) => self.name(recipient),
            (false, None) => "?".to_string(),
        };
        let media = match (&message.media_url, message.message_type) {
            (Some(url), MessageType::Image) => format!(" [image {url}]"),
            (Some(url), MessageType::Video) => format!(" [video {url}]"),
            (Some(url), _) => format!(" [file {url}]"),
            (None, _) => String::new(),
        };
        format!("[{time}] {from} -> {target}: {}{media}", message.content)
    }

    fn describe(&self, selector: &ConversationSelector) -> String {
        match selector {
            ConversationSelector::None => "no conversation".into(),
            ConversationSelector::DirectWith(peer) => format!("chat with {}", self.name(*peer)),
            ConversationSelector::Broadcast(recipients) if recipients.is_empty() => {
                "broadcast (no recipients yet, add some with /to)".into()
            }
            ConversationSelector::Broadcast(recipients) => {
                let names: Vec<_> = recipients.iter().map(|id| self.name(*id)).collect();
                format!("broadcast to {}", names.join(", "))
            }
        }
    }
}

impl View for TerminalView {
    fn session_started(&mut self, user: &UserSummary) {
        self.me = Some(user.id);
        println!("* logged in as {}", user.username);
    }

    fn session_ended(&mut self) {
        self.me = None;
        self.names.clear();
        println!("* logged out");
    }

    fn connection_changed(&mut self, state: ConnectionState, attempt: u32) {
        match state {
            ConnectionState::Connected => println!("* connected"),
            ConnectionState::Reconnecting => {
                println!("* connection lost, reconnecting (attempt {attempt})")
            }
            ConnectionState::Connecting | ConnectionState::Disconnected => {}
        }
    }

    fn render_message(&mut self, message: &MessagePayload) {
        println!("{}", self.format_message(message));
    }

    fn record_message(&mut self, message: &MessagePayload) {
        println!("* new message from {}", self.name(message.sender_id));
    }

    fn render_history(&mut self, messages: &[MessagePayload], placement: HistoryPlacement) {
        if placement == HistoryPlacement::Prepend {
            println!("* {} older message(s)", messages.len());
        }
        for message in messages {
            println!("{}", self.format_message(message));
        }
    }

    fn clear_conversation(&mut self, selector: &ConversationSelector) {
        println!("----- {} -----", self.describe(selector));
    }

    fn selector_changed(&mut self, selector: &ConversationSelector) {
        println!("* now sending to: {}", self.describe(selector));
    }

    fn update_roster(&mut self, roster: &[UserSummary]) {
        for user in roster {
            self.names.insert(user.id, user.username.clone());
        }
    }

    fn update_presence(&mut self, _online: &[UserId]) {}

    fn update_broadcast_preview(&mut self, _preview: &[MessagePayload]) {}

    fn update_delivery(&mut self, _update: &DeliveryUpdate) {}

    fn notice(&mut self, notice: &str) {
        eprintln!("! {notice}");
    }
}

#[cfg(test)]
#[path = "tests/terminal_view_tests.rs"]
mod tests;
