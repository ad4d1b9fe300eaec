//! The sync engine event loop.
//!
//! Every state change happens inside [`SyncEngine::run`], one event at a
//! time. Collaborator calls run as spawned tasks and come back as
//! [`EngineEvent::Completed`], stamped with the session generation they were
//! issued under; a completion from an earlier session is dropped.

use std::{future::Future, sync::Arc, time::Duration};

use shared::{
    domain::UserId,
    protocol::{AuthResponse, ChatHistory, MessagePayload, UserStatus, UserSummary},
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinSet,
};
use tracing::{debug, info, warn};

use crate::{
    api::ApiClient,
    connection::{CloseOutcome, ConnectionManager, ConnectionState},
    credential::CredentialStore,
    error::{EngineStopped, RequestError, SendError, SessionError},
    frame::ServerFrame,
    presence, router,
    send::{self, Draft},
    session::{ConversationSelector, HistoryCursor, Session, SessionLimits},
    settings::ClientSettings,
    transport::{Transport, TransportEvent},
    view::View,
};

/// Upper bound on how long shutdown waits for server logouts.
const LOGOUT_GRACE: Duration = Duration::from_secs(5);

type AuthReply = oneshot::Sender<Result<UserSummary, SessionError>>;
type SendReply = oneshot::Sender<Result<MessagePayload, SendError>>;

#[derive(Debug)]
pub(crate) enum EngineEvent {
    Command(ClientCommand),
    Transport { epoch: u64, event: TransportEvent },
    RetryDue { ticket: u64 },
    Completed { generation: u64, completion: Completion },
}

#[derive(Debug)]
pub(crate) enum ClientCommand {
    Login {
        email: String,
        password: String,
        reply: AuthReply,
    },
    Register {
        username: String,
        email: String,
        password: String,
        reply: AuthReply,
    },
    Resume {
        reply: AuthReply,
    },
    Logout,
    SelectPeer(UserId),
    SetBroadcastMode(bool),
    ToggleBroadcastRecipient(UserId),
    LoadOlderHistory,
    Refresh,
    Send {
        draft: Draft,
        reply: SendReply,
    },
    Snapshot(oneshot::Sender<Option<SessionSnapshot>>),
    ConnectionState(oneshot::Sender<(ConnectionState, u32)>),
    Shutdown,
}

#[derive(Debug)]
pub(crate) enum Completion {
    Authenticated {
        result: Result<AuthResponse, RequestError>,
        resumed: bool,
        reply: AuthReply,
    },
    Roster(Result<Vec<UserSummary>, RequestError>),
    Online(Result<Vec<UserStatus>, RequestError>),
    Broadcasts(Result<ChatHistory, RequestError>),
    PeerHistory {
        peer: UserId,
        request: u64,
        page: u32,
        result: Result<ChatHistory, RequestError>,
    },
    Sent {
        result: Result<MessagePayload, SendError>,
        reply: SendReply,
    },
}

/// Point-in-time copy of the session for callers outside the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub user: UserSummary,
    pub selector: ConversationSelector,
    pub roster: Vec<UserSummary>,
    pub online: Vec<UserId>,
    pub broadcast_preview: Vec<MessagePayload>,
    pub history: Option<HistoryCursor>,
    pub connection: ConnectionState,
    pub reconnect_attempts: u32,
}

/// Cloneable front door to a running engine. Fire-and-forget actions
/// return `EngineStopped` only when the loop has exited.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    fn command(&self, command: ClientCommand) -> Result<(), EngineStopped> {
        self.tx
            .send(EngineEvent::Command(command))
            .map_err(|_| EngineStopped)
    }

    async fn authenticate(
        &self,
        build: impl FnOnce(AuthReply) -> ClientCommand,
    ) -> Result<UserSummary, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.command(build(reply))?;
        rx.await.map_err(|_| SessionError::EngineStopped)?
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserSummary, SessionError> {
        let (email, password) = (email.to_string(), password.to_string());
        self.authenticate(|reply| ClientCommand::Login {
            email,
            password,
            reply,
        })
        .await
    }

    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<UserSummary, SessionError> {
        let (username, email, password) =
            (username.to_string(), email.to_string(), password.to_string());
        self.authenticate(|reply| ClientCommand::Register {
            username,
            email,
            password,
            reply,
        })
        .await
    }

    /// Restores the session from the stored credential, if any.
    pub async fn resume(&self) -> Result<UserSummary, SessionError> {
        self.authenticate(|reply| ClientCommand::Resume { reply })
            .await
    }

    pub fn logout(&self) -> Result<(), EngineStopped> {
        self.command(ClientCommand::Logout)
    }

    pub fn select_peer(&self, peer: UserId) -> Result<(), EngineStopped> {
        self.command(ClientCommand::SelectPeer(peer))
    }

    pub fn set_broadcast_mode(&self, enabled: bool) -> Result<(), EngineStopped> {
        self.command(ClientCommand::SetBroadcastMode(enabled))
    }

    pub fn toggle_broadcast_recipient(&self, user_id: UserId) -> Result<(), EngineStopped> {
        self.command(ClientCommand::ToggleBroadcastRecipient(user_id))
    }

    pub fn load_older_history(&self) -> Result<(), EngineStopped> {
        self.command(ClientCommand::LoadOlderHistory)
    }

    pub fn refresh(&self) -> Result<(), EngineStopped> {
        self.command(ClientCommand::Refresh)
    }

    /// Submits a draft for the current selector. On error the caller still
    /// owns its copy of the draft.
    pub async fn send(&self, draft: Draft) -> Result<MessagePayload, SendError> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::Send { draft, reply })?;
        rx.await.map_err(|_| SendError::EngineStopped)?
    }

    pub async fn snapshot(&self) -> Result<Option<SessionSnapshot>, EngineStopped> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::Snapshot(reply))?;
        rx.await.map_err(|_| EngineStopped)
    }

    pub async fn connection_state(&self) -> Result<(ConnectionState, u32), EngineStopped> {
        let (reply, rx) = oneshot::channel();
        self.command(ClientCommand::ConnectionState(reply))?;
        rx.await.map_err(|_| EngineStopped)
    }

    pub fn shutdown(&self) -> Result<(), EngineStopped> {
        self.command(ClientCommand::Shutdown)
    }
}

pub struct SyncEngine<V: View> {
    api: Arc<dyn ApiClient>,
    credentials: Arc<dyn CredentialStore>,
    connection: ConnectionManager,
    view: V,
    limits: SessionLimits,
    session: Option<Session>,
    generation: u64,
    logouts: JoinSet<()>,
    tx: mpsc::UnboundedSender<EngineEvent>,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl<V: View> SyncEngine<V> {
    pub fn new(
        settings: &ClientSettings,
        api: Arc<dyn ApiClient>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialStore>,
        view: V,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::new(transport, settings.reconnect.clone(), tx.clone());
        let handle = EngineHandle { tx: tx.clone() };
        let engine = Self {
            api,
            credentials,
            connection,
            view,
            limits: SessionLimits::from(settings),
            session: None,
            generation: 0,
            logouts: JoinSet::new(),
            tx,
            rx,
        };
        (engine, handle)
    }

    /// Runs until [`EngineHandle::shutdown`]. Server logouts still in
    /// flight are awaited, up to [`LOGOUT_GRACE`], before the view is
    /// handed back.
    pub async fn run(mut self) -> V {
        info!("engine: started");
        while let Some(event) = self.rx.recv().await {
            if !self.handle_event(event) {
                break;
            }
        }
        self.connection.disconnect();

        let logouts = &mut self.logouts;
        let drained = tokio::time::timeout(LOGOUT_GRACE, async {
            while logouts.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!("engine: gave up waiting for logout request");
        }
        info!("engine: stopped");
        self.view
    }

    fn handle_event(&mut self, event: EngineEvent) -> bool {
        match event {
            EngineEvent::Command(command) => return self.handle_command(command),
            EngineEvent::Transport { epoch, event } => self.handle_transport(epoch, event),
            EngineEvent::RetryDue { ticket } => self.handle_retry_due(ticket),
            EngineEvent::Completed {
                generation,
                completion,
            } => self.handle_completion(generation, completion),
        }
        true
    }

    fn handle_command(&mut self, command: ClientCommand) -> bool {
        match command {
            ClientCommand::Login {
                email,
                password,
                reply,
            } => self.spawn_request(move |api| async move {
                Completion::Authenticated {
                    result: api.login(&email, &password).await,
                    resumed: false,
                    reply,
                }
            }),
            ClientCommand::Register {
                username,
                email,
                password,
                reply,
            } => self.spawn_request(move |api| async move {
                Completion::Authenticated {
                    result: api.register(&username, &email, &password).await,
                    resumed: false,
                    reply,
                }
            }),
            ClientCommand::Resume { reply } => self.resume(reply),
            ClientCommand::Logout => self.end_session(true),
            ClientCommand::SelectPeer(peer) => self.select_peer(peer),
            ClientCommand::SetBroadcastMode(enabled) => self.set_broadcast_mode(enabled),
            ClientCommand::ToggleBroadcastRecipient(user_id) => {
                if let Some(session) = self.session.as_mut() {
                    if session.toggle_broadcast_recipient(user_id) {
                        self.view.selector_changed(session.selector());
                    }
                }
            }
            ClientCommand::LoadOlderHistory => {
                if let Some(peer) = self.session.as_ref().and_then(|s| s.selector().peer()) {
                    self.request_history(peer);
                }
            }
            ClientCommand::Refresh => self.refresh(),
            ClientCommand::Send { draft, reply } => self.send(draft, reply),
            ClientCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            ClientCommand::ConnectionState(reply) => {
                let _ = reply.send((self.connection.state(), self.connection.attempts()));
            }
            ClientCommand::Shutdown => return false,
        }
        true
    }

    fn resume(&mut self, reply: AuthReply) {
        let credential = match self.credentials.load() {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                let _ = reply.send(Err(SessionError::NoCredential));
                return;
            }
            Err(err) => {
                warn!("engine: failed to read stored credential: {err}");
                let _ = reply.send(Err(SessionError::NoCredential));
                return;
            }
        };

        self.spawn_request(move |api| async move {
            let result = api
                .current_user(&credential)
                .await
                .map(|user| AuthResponse {
                    token: credential,
                    expires_at: None,
                    user,
                });
            Completion::Authenticated {
                result,
                resumed: true,
                reply,
            }
        });
    }

    fn start_session(&mut self, credential: String, user: UserSummary, persist: bool) {
        if self.session.is_some() {
            self.end_session(false);
        }
        if persist {
            if let Err(err) = self.credentials.save(&credential) {
                warn!("engine: failed to persist credential: {err}");
            }
        }

        self.generation += 1;
        info!(user_id = %user.id, generation = self.generation, "engine: session started");
        self.session = Some(Session::new(credential, user.clone(), self.limits.clone()));
        self.view.session_started(&user);
        self.pull_session_state();
        self.connect();
    }

    /// Tears the session down. The connection manager drops any pending
    /// retry, so nothing reconnects afterwards.
    fn end_session(&mut self, user_initiated: bool) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.generation += 1;
        self.connection.disconnect();

        if user_initiated {
            let api = Arc::clone(&self.api);
            let credential = session.credential().to_string();
            self.logouts.spawn(async move {
                if let Err(err) = api.logout(&credential).await {
                    debug!("engine: logout request failed: {err}");
                }
            });
            if let Err(err) = self.credentials.clear() {
                warn!("engine: failed to clear stored credential: {err}");
            }
        }

        info!(user_id = %session.user_id(), "engine: session ended");
        self.view.connection_changed(ConnectionState::Disconnected, 0);
        self.view.session_ended();
    }

    fn expire_session(&mut self) {
        if let Err(err) = self.credentials.clear() {
            warn!("engine: failed to clear stored credential: {err}");
        }
        self.view.notice("session expired, please log in again");
        self.end_session(false);
    }

    fn connect(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match self.connection.connect(session.credential()) {
            Ok(()) => self
                .view
                .connection_changed(ConnectionState::Connecting, self.connection.attempts()),
            Err(err) => debug!("engine: connect skipped: {err}"),
        }
    }

    fn pull_session_state(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        let credential = session.credential().to_string();
        let broadcast_limit = session.limits().broadcast_fetch_limit;

        let roster_credential = credential.clone();
        self.spawn_request(move |api| async move {
            Completion::Roster(api.list_users(&roster_credential).await)
        });
        self.refresh_online();
        self.spawn_request(move |api| async move {
            Completion::Broadcasts(api.fetch_messages(&credential, 1, broadcast_limit).await)
        });
    }

    fn refresh_online(&mut self) {
        let Some(credential) = self.session.as_ref().map(|s| s.credential().to_string()) else {
            return;
        };
        self.spawn_request(move |api| async move {
            Completion::Online(api.list_online_users(&credential).await)
        });
    }

    fn select_peer(&mut self, peer: UserId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.select_peer(peer) {
            return;
        }
        self.view.clear_conversation(session.selector());
        self.view.selector_changed(session.selector());
        self.request_history(peer);
    }

    /// Leaving broadcast mode reopens the last peer the way selecting it
    /// does, so direct messages recorded meanwhile come back with page 1.
    fn set_broadcast_mode(&mut self, enabled: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.set_broadcast_mode(enabled) {
            return;
        }
        let restored = session.selector().peer();
        match restored {
            Some(peer) => self.select_peer(peer),
            None => self.view.selector_changed(session.selector()),
        }
    }

    fn request_history(&mut self, peer: UserId) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let Some((request, page)) = session.begin_history_request(peer) else {
            debug!(user_id = %peer, "engine: history request already pending or exhausted");
            return;
        };
        let credential = session.credential().to_string();
        let limit = session.limits().history_page_size;
        self.spawn_request(move |api| async move {
            Completion::PeerHistory {
                peer,
                request,
                page,
                result: api.fetch_history(&credential, peer, page, limit).await,
            }
        });
    }

    fn refresh(&mut self) {
        if self.session.is_none() {
            return;
        }
        self.pull_session_state();
        if let Some(peer) = self.session.as_ref().and_then(|s| s.selector().peer()) {
            self.select_peer(peer);
        }
    }

    fn send(&mut self, draft: Draft, reply: SendReply) {
        let Some(session) = self.session.as_ref() else {
            let _ = reply.send(Err(SendError::NotLoggedIn));
            return;
        };
        let plan = match send::validate(session.selector(), &draft) {
            Ok(plan) => plan,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };
        let credential = session.credential().to_string();
        self.spawn_request(move |api| async move {
            Completion::Sent {
                result: send::execute(api.as_ref(), &credential, plan).await,
                reply,
            }
        });
    }

    fn handle_transport(&mut self, epoch: u64, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if self.connection.on_opened(epoch) {
                    self.view.connection_changed(ConnectionState::Connected, 0);
                    self.refresh_online();
                }
            }
            TransportEvent::Frame(text) => {
                for frame in self.connection.on_frame(epoch, &text) {
                    self.apply_frame(frame);
                }
            }
            TransportEvent::Closed { reason } => {
                let outcome =
                    self.connection
                        .on_closed(epoch, reason.as_ref(), self.session.is_some());
                match outcome {
                    CloseOutcome::RetryScheduled { attempt, .. } => self
                        .view
                        .connection_changed(ConnectionState::Reconnecting, attempt),
                    CloseOutcome::Stopped => self
                        .view
                        .connection_changed(ConnectionState::Disconnected, 0),
                    CloseOutcome::Ignored => {}
                }
            }
        }
    }

    fn handle_retry_due(&mut self, ticket: u64) {
        let credential = self.session.as_ref().map(|s| s.credential().to_string());
        if self.connection.on_retry_due(ticket, credential.as_deref()) {
            self.view
                .connection_changed(ConnectionState::Connecting, self.connection.attempts());
        }
    }

    fn apply_frame(&mut self, frame: ServerFrame) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match frame {
            ServerFrame::NewMessage(message) => {
                router::deliver(session, &mut self.view, &message);
            }
            ServerFrame::UserStatus(status) => {
                if presence::apply(session, &status) {
                    self.view.update_presence(session.online());
                }
                self.view.update_roster(session.roster());
            }
            ServerFrame::DeliveryUpdate(update) => {
                session.apply_delivery(&update);
                self.view.update_delivery(&update);
            }
        }
    }

    fn handle_completion(&mut self, generation: u64, completion: Completion) {
        let current = generation == self.generation;
        match completion {
            Completion::Authenticated {
                result,
                resumed,
                reply,
            } => self.on_authenticated(result, resumed, reply),
            Completion::Sent { result, reply } => {
                if let (true, Ok(message), Some(session)) =
                    (current, &result, self.session.as_mut())
                {
                    router::deliver(session, &mut self.view, message);
                }
                let _ = reply.send(result);
            }
            _ if !current => debug!(generation, "engine: dropping completion from ended session"),
            Completion::Roster(result) => match result {
                Ok(users) => {
                    if let Some(session) = self.session.as_mut() {
                        session.set_roster(users);
                        self.view.update_roster(session.roster());
                    }
                }
                Err(err) => self.report(err, "failed to load users"),
            },
            Completion::Online(result) => match result {
                Ok(statuses) => {
                    if let Some(session) = self.session.as_mut() {
                        presence::reconcile_snapshot(session, &statuses);
                        self.view.update_presence(session.online());
                        self.view.update_roster(session.roster());
                    }
                }
                Err(err) => self.report(err, "failed to load online users"),
            },
            Completion::Broadcasts(result) => match result {
                Ok(history) => {
                    if let Some(session) = self.session.as_mut() {
                        session.merge_broadcast_history(history.messages);
                        self.view
                            .update_broadcast_preview(&session.broadcast_preview());
                    }
                }
                Err(err) => self.report(err, "failed to load broadcast messages"),
            },
            Completion::PeerHistory {
                peer,
                request,
                page,
                result,
            } => self.on_peer_history(peer, request, page, result),
        }
    }

    fn on_authenticated(
        &mut self,
        result: Result<AuthResponse, RequestError>,
        resumed: bool,
        reply: AuthReply,
    ) {
        match result {
            Ok(auth) => {
                let user = auth.user.clone();
                self.start_session(auth.token, auth.user, !resumed);
                let _ = reply.send(Ok(user));
            }
            Err(err) => {
                if resumed && err.is_unauthorized() {
                    info!("engine: stored credential rejected, clearing it");
                    if let Err(clear_err) = self.credentials.clear() {
                        warn!("engine: failed to clear stored credential: {clear_err}");
                    }
                }
                let _ = reply.send(Err(err.into()));
            }
        }
    }

    fn on_peer_history(
        &mut self,
        peer: UserId,
        request: u64,
        page: u32,
        result: Result<ChatHistory, RequestError>,
    ) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match result {
            Ok(history) => {
                if !session.finish_history_request(peer, request, page, history.has_more) {
                    debug!(user_id = %peer, page, "engine: dropping history for stale selection");
                    return;
                }
                let drawn = if page <= 1 {
                    router::hydrate(session, &mut self.view, history.messages)
                } else {
                    router::prepend_older(session, &mut self.view, history.messages)
                };
                debug!(user_id = %peer, page, drawn, "engine: history applied");
            }
            Err(err) => {
                session.abandon_history_request(request);
                self.report(err, "failed to load conversation");
            }
        }
    }

    fn report(&mut self, err: RequestError, context: &str) {
        if err.is_unauthorized() && self.session.is_some() {
            warn!("engine: {context}: {err}");
            self.expire_session();
            return;
        }
        warn!("engine: {context}: {err}");
        self.view.notice(&format!("{context}: {err}"));
    }

    fn snapshot(&self) -> Option<SessionSnapshot> {
        let session = self.session.as_ref()?;
        Some(SessionSnapshot {
            user: session.current_user().clone(),
            selector: session.selector().clone(),
            roster: session.roster().to_vec(),
            online: session.online().to_vec(),
            broadcast_preview: session.broadcast_preview(),
            history: session.history_cursor().cloned(),
            connection: self.connection.state(),
            reconnect_attempts: self.connection.attempts(),
        })
    }

    fn spawn_request<F, Fut>(&self, request: F)
    where
        F: FnOnce(Arc<dyn ApiClient>) -> Fut,
        Fut: Future<Output = Completion> + Send + 'static,
    {
        let generation = self.generation;
        let events = self.tx.clone();
        let pending = request(Arc::clone(&self.api));
        tokio::spawn(async move {
            let completion = pending.await;
            let _ = events.send(EngineEvent::Completed {
                generation,
                completion,
            });
        });
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
