use shared::error::ApiError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Push channel failures. Recovered by reconnecting, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),
    #[error("failed to connect websocket: {0}")]
    Connect(String),
    #[error("websocket receive failed: {0}")]
    Receive(String),
}

/// Pull-side API failures, surfaced to the view as non-fatal notices.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Network(String),
    #[error("server responded with status {status}")]
    Status { status: u16 },
    #[error("{}", .0.message)]
    Rejected(ApiError),
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RequestError {
    /// True when the server refused the credential itself.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Status { status } => *status == 401,
            Self::Rejected(error) => matches!(
                error.code.as_str(),
                "UNAUTHORIZED" | "INVALID_TOKEN" | "TOKEN_EXPIRED"
            ),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Status {
                status: status.as_u16(),
            },
            None => Self::Network(err.to_string()),
        }
    }
}

/// Composer-level failures; the caller keeps its draft for retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("select at least one recipient for a broadcast message")]
    NoRecipients,
    #[error("select a user to send a message to")]
    NoTarget,
    #[error("message is empty")]
    EmptyMessage,
    #[error("file upload failed: {0}")]
    UploadFailed(String),
    #[error("message was rejected: {0}")]
    Rejected(RequestError),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("sync engine is not running")]
    EngineStopped,
}

/// Inbound frame could not be decoded. Logged and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("invalid {kind} payload: {reason}")]
    Payload { kind: String, reason: String },
}

/// Login, registration or resumption did not produce a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("no stored credential")]
    NoCredential,
    #[error("sync engine is not running")]
    EngineStopped,
}

impl From<EngineStopped> for SessionError {
    fn from(_: EngineStopped) -> Self {
        Self::EngineStopped
    }
}

impl From<EngineStopped> for SendError {
    fn from(_: EngineStopped) -> Self {
        Self::EngineStopped
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential store io failure: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("connect is not valid while {0:?}")]
    InvalidState(ConnectionState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sync engine is not running")]
pub struct EngineStopped;
