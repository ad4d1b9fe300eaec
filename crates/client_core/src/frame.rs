//! Push frame decoding.
//!
//! Frames arrive as `{type, data, timestamp}`. A single websocket text
//! message may carry several frames separated by newlines because the server
//! coalesces queued writes.

use serde::Deserialize;
use shared::protocol::{DeliveryUpdate, MessagePayload, UserStatus};

use crate::error::DecodeError;

pub const NEW_MESSAGE: &str = "new_message";
pub const USER_STATUS: &str = "user_status";
pub const DELIVERY_UPDATE: &str = "delivery_update";

#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    NewMessage(MessagePayload),
    UserStatus(UserStatus),
    DeliveryUpdate(DeliveryUpdate),
}

impl ServerFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => NEW_MESSAGE,
            Self::UserStatus(_) => USER_STATUS,
            Self::DeliveryUpdate(_) => DELIVERY_UPDATE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Known(ServerFrame),
    /// A kind this client does not handle (`ping`, `error`, newer kinds).
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

pub fn split_frames(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

pub fn decode_frame(text: &str) -> Result<DecodedFrame, DecodeError> {
    let raw: RawFrame =
        serde_json::from_str(text).map_err(|err| DecodeError::Malformed(err.to_string()))?;

    let frame = match raw.kind.as_str() {
        NEW_MESSAGE => ServerFrame::NewMessage(payload(&raw.kind, raw.data)?),
        USER_STATUS => ServerFrame::UserStatus(payload(&raw.kind, raw.data)?),
        DELIVERY_UPDATE => ServerFrame::DeliveryUpdate(payload(&raw.kind, raw.data)?),
        _ => return Ok(DecodedFrame::Unknown(raw.kind)),
    };
    Ok(DecodedFrame::Known(frame))
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: &str,
    data: serde_json::Value,
) -> Result<T, DecodeError> {
    serde_json::from_value(data).map_err(|err| DecodeError::Payload {
        kind: kind.to_string(),
        reason: err.to_string(),
    })
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
