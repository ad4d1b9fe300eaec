//! Real-time sync engine for the chat client.
//!
//! [`SyncEngine`] owns the session, the push connection and the rendering
//! decisions; the HTTP API, the push transport, the credential store and
//! the view are collaborators behind traits.

pub mod api;
pub mod connection;
pub mod credential;
pub mod engine;
pub mod error;
pub mod frame;
pub mod presence;
pub mod router;
pub mod send;
pub mod session;
pub mod settings;
pub mod transport;
pub mod view;

#[cfg(test)]
mod test_support;

pub use api::{ApiClient, AttachmentUpload, HttpApiClient};
pub use connection::{Backoff, CloseOutcome, ConnectionState, ReconnectPolicy};
pub use credential::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
pub use engine::{EngineHandle, SessionSnapshot, SyncEngine};
pub use error::{
    CredentialError, DecodeError, EngineStopped, RequestError, SendError, SessionError,
    TransportError,
};
pub use router::RenderDecision;
pub use send::Draft;
pub use session::{ConversationSelector, Session};
pub use settings::{load_settings, ClientSettings};
pub use transport::{Transport, TransportEvent, TransportLink, TransportSink, WebSocketTransport};
pub use view::{HistoryPlacement, View};
