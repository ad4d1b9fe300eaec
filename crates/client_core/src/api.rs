use async_trait::async_trait;
use reqwest::{multipart, Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::UserId,
    error::ApiError,
    protocol::{
        ApiEnvelope, AuthResponse, BroadcastMessageRequest, ChatHistory, DirectMessageRequest,
        LoginRequest, MessagePayload, RegisterRequest, UploadResponse, UserStatus, UserSummary,
    },
};
use tracing::debug;

use crate::error::RequestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentUpload {
    pub filename: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Pull side of the chat service. Every call other than login/register
/// carries the bearer credential of the active session.
#[async_trait]
pub trait ApiClient: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, RequestError>;
    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, RequestError>;
    async fn logout(&self, credential: &str) -> Result<(), RequestError>;
    async fn current_user(&self, credential: &str) -> Result<UserSummary, RequestError>;
    async fn list_users(&self, credential: &str) -> Result<Vec<UserSummary>, RequestError>;
    async fn list_online_users(&self, credential: &str) -> Result<Vec<UserStatus>, RequestError>;
    async fn fetch_messages(
        &self,
        credential: &str,
        page: u32,
        limit: u32,
    ) -> Result<ChatHistory, RequestError>;
    async fn fetch_history(
        &self,
        credential: &str,
        peer: UserId,
        page: u32,
        limit: u32,
    ) -> Result<ChatHistory, RequestError>;
    async fn send_direct(
        &self,
        credential: &str,
        request: DirectMessageRequest,
    ) -> Result<MessagePayload, RequestError>;
    async fn send_broadcast(
        &self,
        credential: &str,
        request: BroadcastMessageRequest,
    ) -> Result<MessagePayload, RequestError>;
    async fn upload_attachment(
        &self,
        credential: &str,
        attachment: AttachmentUpload,
    ) -> Result<UploadResponse, RequestError>;
}

#[derive(Serialize)]
struct PageQuery {
    page: u32,
    limit: u32,
}

#[derive(Serialize)]
struct HistoryQuery {
    user_id: UserId,
    page: u32,
    limit: u32,
}

pub struct HttpApiClient {
    http: Client,
    server_url: String,
}

impl HttpApiClient {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api{path}", self.server_url)
    }

    async fn post_json<B, T>(
        &self,
        path: &str,
        credential: Option<&str>,
        body: &B,
    ) -> Result<T, RequestError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.http.post(self.url(path)).json(body);
        if let Some(credential) = credential {
            request = request.bearer_auth(credential);
        }
        require_data(path, decode_envelope(request.send().await?).await?)
    }

    async fn get_json<Q, T>(
        &self,
        path: &str,
        credential: &str,
        query: Option<&Q>,
    ) -> Result<Option<T>, RequestError>
    where
        Q: Serialize + Sync,
        T: DeserializeOwned,
    {
        let mut request = self.http.get(self.url(path)).bearer_auth(credential);
        if let Some(query) = query {
            request = request.query(query);
        }
        decode_envelope(request.send().await?).await
    }
}

/// Decodes the response envelope whatever the HTTP status, since the server
/// reports failures as `success: false` bodies on 4xx/5xx responses.
async fn decode_envelope<T: DeserializeOwned>(response: Response) -> Result<Option<T>, RequestError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    let envelope: ApiEnvelope<T> = match serde_json::from_slice(&bytes) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(RequestError::Status {
                status: status.as_u16(),
            })
        }
        Err(err) => return Err(RequestError::Malformed(err.to_string())),
    };

    if envelope.success {
        return Ok(envelope.data);
    }

    let error = envelope.error.unwrap_or_else(|| {
        ApiError::new(
            "UNKNOWN",
            format!("request failed with status {}", status.as_u16()),
        )
    });
    debug!(status = status.as_u16(), code = %error.code, "api: request rejected");
    Err(RequestError::Rejected(error))
}

fn require_data<T>(path: &str, data: Option<T>) -> Result<T, RequestError> {
    data.ok_or_else(|| RequestError::Malformed(format!("{path}: response carried no data")))
}

#[async_trait]
impl ApiClient for HttpApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, RequestError> {
        self.post_json(
            "/auth/login",
            None,
            &LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            },
        )
        .await
    }

    async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<AuthResponse, RequestError> {
        self.post_json(
            "/auth/register",
            None,
            &RegisterRequest {
                username: username.to_string(),
                email: email.to_string(),
                password: password.to_string(),
            },
        )
        .await
    }

    async fn logout(&self, credential: &str) -> Result<(), RequestError> {
        let response = self
            .http
            .post(self.url("/auth/logout"))
            .bearer_auth(credential)
            .send()
            .await?;
        decode_envelope::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn current_user(&self, credential: &str) -> Result<UserSummary, RequestError> {
        let user = self
            .get_json::<(), _>("/users/me", credential, None)
            .await?;
        require_data("/users/me", user)
    }

    async fn list_users(&self, credential: &str) -> Result<Vec<UserSummary>, RequestError> {
        Ok(self
            .get_json::<(), Vec<UserSummary>>("/users", credential, None)
            .await?
            .unwrap_or_default())
    }

    async fn list_online_users(&self, credential: &str) -> Result<Vec<UserStatus>, RequestError> {
        Ok(self
            .get_json::<(), Vec<UserStatus>>("/users/online", credential, None)
            .await?
            .unwrap_or_default())
    }

    async fn fetch_messages(
        &self,
        credential: &str,
        page: u32,
        limit: u32,
    ) -> Result<ChatHistory, RequestError> {
        let history = self
            .get_json("/messages", credential, Some(&PageQuery { page, limit }))
            .await?;
        require_data("/messages", history)
    }

    async fn fetch_history(
        &self,
        credential: &str,
        peer: UserId,
        page: u32,
        limit: u32,
    ) -> Result<ChatHistory, RequestError> {
        let history = self
            .get_json(
                "/messages/history",
                credential,
                Some(&HistoryQuery {
                    user_id: peer,
                    page,
                    limit,
                }),
            )
            .await?;
        require_data("/messages/history", history)
    }

    async fn send_direct(
        &self,
        credential: &str,
        request: DirectMessageRequest,
    ) -> Result<MessagePayload, RequestError> {
        self.post_json("/messages/send", Some(credential), &request)
            .await
    }

    async fn send_broadcast(
        &self,
        credential: &str,
        request: BroadcastMessageRequest,
    ) -> Result<MessagePayload, RequestError> {
        self.post_json("/messages/broadcast", Some(credential), &request)
            .await
    }

    async fn upload_attachment(
        &self,
        credential: &str,
        attachment: AttachmentUpload,
    ) -> Result<UploadResponse, RequestError> {
        let part = multipart::Part::bytes(attachment.bytes)
            .file_name(attachment.filename)
            .mime_str(
                attachment
                    .mime_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
            )?;
        let form = multipart::Form::new().part("file", part);
        let response = self
            .http
            .post(self.url("/media/upload"))
            .bearer_auth(credential)
            .multipart(form)
            .send()
            .await?;
        require_data("/media/upload", decode_envelope(response).await?)
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
