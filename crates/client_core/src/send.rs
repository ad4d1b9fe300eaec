use shared::{
    domain::{MessageType, UserId},
    protocol::{BroadcastMessageRequest, DirectMessageRequest, MessagePayload},
};
use tracing::{info, warn};

use crate::{
    api::{ApiClient, AttachmentUpload},
    error::SendError,
    session::ConversationSelector,
};

/// Content used when a draft carries only an attachment.
pub const ATTACHMENT_ONLY_CONTENT: &str = "File attachment";

/// What the composer holds. Never consumed by a failed send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub content: String,
    pub attachment: Option<AttachmentUpload>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: AttachmentUpload) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTarget {
    Direct(UserId),
    Broadcast(Vec<UserId>),
}

/// A draft that passed validation against the selector it was written for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPlan {
    pub target: SendTarget,
    pub content: String,
    pub attachment: Option<AttachmentUpload>,
}

/// Checks a draft without touching the network: recipients or target
/// first, then emptiness.
pub fn validate(selector: &ConversationSelector, draft: &Draft) -> Result<SendPlan, SendError> {
    let target = match selector {
        ConversationSelector::Broadcast(recipients) if recipients.is_empty() => {
            return Err(SendError::NoRecipients)
        }
        ConversationSelector::Broadcast(recipients) => {
            SendTarget::Broadcast(recipients.iter().copied().collect())
        }
        ConversationSelector::DirectWith(peer) => SendTarget::Direct(*peer),
        ConversationSelector::None => return Err(SendError::NoTarget),
    };

    let content = draft.content.trim();
    if content.is_empty() && draft.attachment.is_none() {
        return Err(SendError::EmptyMessage);
    }

    Ok(SendPlan {
        target,
        content: content.to_string(),
        attachment: draft.attachment.clone(),
    })
}

/// Uploads the staged attachment (if any) and submits the message. The
/// returned message is the server's authoritative copy.
pub async fn execute(
    api: &dyn ApiClient,
    credential: &str,
    plan: SendPlan,
) -> Result<MessagePayload, SendError> {
    let mut message_type = MessageType::Text;
    let mut media_url = None;

    if let Some(attachment) = plan.attachment {
        message_type = MessageType::from_filename(&attachment.filename);
        let filename = attachment.filename.clone();
        let uploaded = api
            .upload_attachment(credential, attachment)
            .await
            .map_err(|err| {
                warn!(filename = %filename, "send: attachment upload failed: {err}");
                SendError::UploadFailed(err.to_string())
            })?;
        media_url = Some(uploaded.url);
    }

    let content = if plan.content.is_empty() {
        ATTACHMENT_ONLY_CONTENT.to_string()
    } else {
        plan.content
    };

    let message = match plan.target {
        SendTarget::Direct(recipient_id) => {
            api.send_direct(
                credential,
                DirectMessageRequest {
                    recipient_id,
                    content,
                    message_type,
                    media_url,
                },
            )
            .await
        }
        SendTarget::Broadcast(recipient_ids) => {
            api.send_broadcast(
                credential,
                BroadcastMessageRequest {
                    recipient_ids,
                    content,
                    message_type,
                    media_url,
                },
            )
            .await
        }
    }
    .map_err(SendError::Rejected)?;

    info!(message_id = %message.id, broadcast = message.is_broadcast, "send: accepted");
    Ok(message)
}

#[cfg(test)]
#[path = "tests/send_tests.rs"]
mod tests;
