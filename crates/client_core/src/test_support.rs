//! In-memory collaborators shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use shared::{
    domain::{DeliveryStatus, MessageId, MessageType, UserId},
    protocol::{
        AuthResponse, BroadcastMessageRequest, ChatHistory, DeliveryUpdate, DirectMessageRequest,
        MessagePayload, UploadResponse, UserStatus, UserSummary,
    },
};
use tokio::sync::Notify;

use crate::{
    api::{ApiClient, AttachmentUpload},
    connection::ConnectionState,
    error::RequestError,
    session::ConversationSelector,
    transport::{Transport, TransportLink, TransportSink},
    view::{HistoryPlacement, View},
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("test mutex poisoned")
}

pub(crate) fn user(username: &str) -> UserSummary {
    UserSummary {
        id: UserId::new_v4(),
        username: username.to_string(),
        is_online: false,
    }
}

pub(crate) fn at_minute(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub(crate) fn direct(sender: UserId, recipient: UserId, content: &str) -> MessagePayload {
    MessagePayload {
        id: MessageId::new_v4(),
        sender_id: sender,
        sender_username: String::new(),
        recipient_id: Some(recipient),
        content: content.to_string(),
        message_type: MessageType::Text,
        media_url: None,
        media_filename: None,
        media_size: None,
        delivery_status: DeliveryStatus::Sent,
        created_at: Utc::now(),
        is_broadcast: false,
    }
}

pub(crate) fn broadcast(sender: UserId, content: &str) -> MessagePayload {
    MessagePayload {
        recipient_id: None,
        is_broadcast: true,
        ..direct(sender, sender, content)
    }
}

pub(crate) fn status(user_id: UserId, is_online: bool) -> UserStatus {
    UserStatus {
        user_id,
        is_online,
        last_seen: None,
    }
}

pub(crate) fn history(messages: Vec<MessagePayload>, page: u32, has_more: bool) -> ChatHistory {
    ChatHistory {
        total: messages.len() as i64,
        messages,
        page,
        limit: 50,
        has_more,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ViewCall {
    SessionStarted(UserId),
    SessionEnded,
    Connection(ConnectionState, u32),
    Rendered(MessageId),
    Recorded(MessageId),
    History(Vec<MessageId>, HistoryPlacement),
    Cleared(ConversationSelector),
    Selector(ConversationSelector),
    Roster(Vec<(UserId, bool)>),
    Presence(Vec<UserId>),
    BroadcastPreview(Vec<MessageId>),
    Delivery(MessageId, DeliveryStatus),
    Notice(String),
}

#[derive(Clone, Default)]
pub(crate) struct RecordingView {
    calls: Arc<Mutex<Vec<ViewCall>>>,
}

impl RecordingView {
    pub(crate) fn calls(&self) -> Vec<ViewCall> {
        lock(&self.calls).clone()
    }

    pub(crate) fn render_count(&self, id: MessageId) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| **call == ViewCall::Rendered(id))
            .count()
    }

    pub(crate) fn last_roster(&self) -> Option<Vec<(UserId, bool)>> {
        lock(&self.calls).iter().rev().find_map(|call| match call {
            ViewCall::Roster(roster) => Some(roster.clone()),
            _ => None,
        })
    }

    pub(crate) fn last_presence(&self) -> Option<Vec<UserId>> {
        lock(&self.calls).iter().rev().find_map(|call| match call {
            ViewCall::Presence(online) => Some(online.clone()),
            _ => None,
        })
    }

    pub(crate) fn history_batches(&self) -> Vec<(Vec<MessageId>, HistoryPlacement)> {
        lock(&self.calls)
            .iter()
            .filter_map(|call| match call {
                ViewCall::History(ids, placement) => Some((ids.clone(), *placement)),
                _ => None,
            })
            .collect()
    }

    /// Polls until `predicate` holds over the recorded calls.
    pub(crate) async fn wait_for(&self, what: &str, predicate: impl Fn(&[ViewCall]) -> bool) {
        for _ in 0..500 {
            if predicate(&lock(&self.calls)) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}; calls: {:#?}", self.calls());
    }

    fn push(&self, call: ViewCall) {
        lock(&self.calls).push(call);
    }
}

impl View for RecordingView {
    fn session_started(&mut self, user: &UserSummary) {
        self.push(ViewCall::SessionStarted(user.id));
    }

    fn session_ended(&mut self) {
        self.push(ViewCall::SessionEnded);
    }

    fn connection_changed(&mut self, state: ConnectionState, attempt: u32) {
        self.push(ViewCall::Connection(state, attempt));
    }

    fn render_message(&mut self, message: &MessagePayload) {
        self.push(ViewCall::Rendered(message.id));
    }

    fn record_message(&mut self, message: &MessagePayload) {
        self.push(ViewCall::Recorded(message.id));
    }

    fn render_history(&mut self, messages: &[MessagePayload], placement: HistoryPlacement) {
        self.push(ViewCall::History(
            messages.iter().map(|m| m.id).collect(),
            placement,
        ));
    }

    fn clear_conversation(&mut self, selector: &ConversationSelector) {
        self.push(ViewCall::Cleared(selector.clone()));
    }

    fn selector_changed(&mut self, selector: &ConversationSelector) {
        self.push(ViewCall::Selector(selector.clone()));
    }

    fn update_roster(&mut self, roster: &[UserSummary]) {
        self.push(ViewCall::Roster(
            roster.iter().map(|u| (u.id, u.is_online)).collect(),
        ));
    }

    fn update_presence(&mut self, online: &[UserId]) {
        self.push(ViewCall::Presence(online.to_vec()));
    }

    fn update_broadcast_preview(&mut self, preview: &[MessagePayload]) {
        self.push(ViewCall::BroadcastPreview(
            preview.iter().map(|m| m.id).collect(),
        ));
    }

    fn update_delivery(&mut self, update: &DeliveryUpdate) {
        self.push(ViewCall::Delivery(update.message_id, update.status));
    }

    fn notice(&mut self, notice: &str) {
        self.push(ViewCall::Notice(notice.to_string()));
    }
}

#[derive(Default)]
struct TransportState {
    sinks: Vec<TransportSink>,
    credentials: Vec<String>,
    closed: Vec<u64>,
}

/// Records every connect and hands out the sinks so tests can play the
/// server side.
#[derive(Clone, Default)]
pub(crate) struct TestTransport {
    state: Arc<Mutex<TransportState>>,
}

impl TestTransport {
    pub(crate) fn connect_count(&self) -> usize {
        lock(&self.state).sinks.len()
    }

    pub(crate) fn credentials(&self) -> Vec<String> {
        lock(&self.state).credentials.clone()
    }

    pub(crate) fn last_sink(&self) -> TransportSink {
        lock(&self.state)
            .sinks
            .last()
            .cloned()
            .expect("no connect recorded")
    }

    pub(crate) fn closed_epochs(&self) -> Vec<u64> {
        lock(&self.state).closed.clone()
    }
}

impl Transport for TestTransport {
    fn connect(&self, credential: &str, sink: TransportSink) -> Box<dyn TransportLink> {
        let epoch = sink.epoch();
        let mut state = lock(&self.state);
        state.sinks.push(sink);
        state.credentials.push(credential.to_string());
        Box::new(TestLink {
            epoch,
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

struct TestLink {
    epoch: u64,
    state: Arc<Mutex<TransportState>>,
    closed: bool,
}

impl TransportLink for TestLink {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.state).closed.push(self.epoch);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ApiCall {
    Login(String),
    Register(String),
    Logout(String),
    CurrentUser(String),
    ListUsers,
    ListOnline,
    FetchMessages { page: u32, limit: u32 },
    FetchHistory { peer: UserId, page: u32, limit: u32 },
    SendDirect { recipient: UserId, content: String, message_type: MessageType, media_url: Option<String> },
    SendBroadcast { recipients: Vec<UserId>, content: String },
    Upload(String),
}

/// Scriptable API double. Sends echo the request back as an accepted
/// message authored by `me`.
pub(crate) struct MockApi {
    pub me: UserSummary,
    pub token: String,
    pub users: Mutex<Vec<UserSummary>>,
    pub online: Mutex<Vec<UserStatus>>,
    pub broadcasts: Mutex<Vec<MessagePayload>>,
    pub histories: Mutex<HashMap<(UserId, u32), ChatHistory>>,
    pub current_user_error: Mutex<Option<RequestError>>,
    pub users_error: Mutex<Option<RequestError>>,
    pub upload_error: Mutex<Option<RequestError>>,
    pub send_error: Mutex<Option<RequestError>>,
    pub history_gate: Mutex<Option<Arc<Notify>>>,
    pub logout_gate: Mutex<Option<Arc<Notify>>>,
    pub sent: Mutex<Vec<MessagePayload>>,
    pub calls: Mutex<Vec<ApiCall>>,
}

impl MockApi {
    pub(crate) fn new(me: UserSummary) -> Self {
        Self {
            me,
            token: "token-1".into(),
            users: Mutex::default(),
            online: Mutex::default(),
            broadcasts: Mutex::default(),
            histories: Mutex::default(),
            current_user_error: Mutex::default(),
            users_error: Mutex::default(),
            upload_error: Mutex::default(),
            send_error: Mutex::default(),
            history_gate: Mutex::default(),
            logout_gate: Mutex::default(),
            sent: Mutex::default(),
            calls: Mutex::default(),
        }
    }

    pub(crate) fn calls(&self) -> Vec<ApiCall> {
        lock(&self.calls).clone()
    }

    pub(crate) fn set<T>(&self, slot: &Mutex<T>, value: T) {
        *lock(slot) = value;
    }

    pub(crate) fn add_history(&self, peer: UserId, history: ChatHistory) {
        lock(&self.histories).insert((peer, history.page), history);
    }

    pub(crate) fn last_sent(&self) -> MessagePayload {
        lock(&self.sent).last().cloned().expect("nothing sent")
    }

    fn record(&self, call: ApiCall) {
        lock(&self.calls).push(call);
    }

    fn accept(&self, message: MessagePayload) -> MessagePayload {
        lock(&self.sent).push(message.clone());
        message
    }

    fn auth(&self) -> AuthResponse {
        AuthResponse {
            token: self.token.clone(),
            expires_at: None,
            user: self.me.clone(),
        }
    }
}

#[async_trait]
impl ApiClient for MockApi {
    async fn login(&self, email: &str, _password: &str) -> Result<AuthResponse, RequestError> {
        self.record(ApiCall::Login(email.to_string()));
        Ok(self.auth())
    }

    async fn register(
        &self,
        username: &str,
        _email: &str,
        _password: &str,
    ) -> Result<AuthResponse, RequestError> {
        self.record(ApiCall::Register(username.to_string()));
        Ok(self.auth())
    }

    /// Recorded only once the gate, if any, lets the request through.
    async fn logout(&self, credential: &str) -> Result<(), RequestError> {
        let gate = lock(&self.logout_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.record(ApiCall::Logout(credential.to_string()));
        Ok(())
    }

    async fn current_user(&self, credential: &str) -> Result<UserSummary, RequestError> {
        self.record(ApiCall::CurrentUser(credential.to_string()));
        match lock(&self.current_user_error).clone() {
            Some(err) => Err(err),
            None => Ok(self.me.clone()),
        }
    }

    async fn list_users(&self, _credential: &str) -> Result<Vec<UserSummary>, RequestError> {
        self.record(ApiCall::ListUsers);
        match lock(&self.users_error).clone() {
            Some(err) => Err(err),
            None => Ok(lock(&self.users).clone()),
        }
    }

    async fn list_online_users(&self, _credential: &str) -> Result<Vec<UserStatus>, RequestError> {
        self.record(ApiCall::ListOnline);
        Ok(lock(&self.online).clone())
    }

    async fn fetch_messages(
        &self,
        _credential: &str,
        page: u32,
        limit: u32,
    ) -> Result<ChatHistory, RequestError> {
        self.record(ApiCall::FetchMessages { page, limit });
        Ok(history(lock(&self.broadcasts).clone(), page, false))
    }

    async fn fetch_history(
        &self,
        _credential: &str,
        peer: UserId,
        page: u32,
        limit: u32,
    ) -> Result<ChatHistory, RequestError> {
        self.record(ApiCall::FetchHistory { peer, page, limit });
        let gate = lock(&self.history_gate).clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(lock(&self.histories)
            .get(&(peer, page))
            .cloned()
            .unwrap_or_else(|| history(Vec::new(), page, false)))
    }

    async fn send_direct(
        &self,
        _credential: &str,
        request: DirectMessageRequest,
    ) -> Result<MessagePayload, RequestError> {
        self.record(ApiCall::SendDirect {
            recipient: request.recipient_id,
            content: request.content.clone(),
            message_type: request.message_type,
            media_url: request.media_url.clone(),
        });
        if let Some(err) = lock(&self.send_error).clone() {
            return Err(err);
        }
        let mut message = direct(self.me.id, request.recipient_id, &request.content);
        message.message_type = request.message_type;
        message.media_url = request.media_url;
        Ok(self.accept(message))
    }

    async fn send_broadcast(
        &self,
        _credential: &str,
        request: BroadcastMessageRequest,
    ) -> Result<MessagePayload, RequestError> {
        self.record(ApiCall::SendBroadcast {
            recipients: request.recipient_ids.clone(),
            content: request.content.clone(),
        });
        if let Some(err) = lock(&self.send_error).clone() {
            return Err(err);
        }
        Ok(self.accept(broadcast(self.me.id, &request.content)))
    }

    async fn upload_attachment(
        &self,
        _credential: &str,
        attachment: AttachmentUpload,
    ) -> Result<UploadResponse, RequestError> {
        self.record(ApiCall::Upload(attachment.filename.clone()));
        if let Some(err) = lock(&self.upload_error).clone() {
            return Err(err);
        }
        Ok(UploadResponse {
            url: format!("/uploads/{}", attachment.filename),
            size: attachment.bytes.len() as i64,
            content_type: "file".into(),
            filename: attachment.filename,
        })
    }
}
