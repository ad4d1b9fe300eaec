use super::*;

use serde_json::json;
use shared::domain::{DeliveryStatus, UserId};

#[test]
fn decodes_user_status_frame() {
    let user_id = UserId::new_v4();
    let text = json!({
        "type": "user_status",
        "data": { "user_id": user_id, "is_online": true, "last_seen": "2024-05-01T10:00:00Z" },
        "timestamp": "2024-05-01T10:00:00Z",
    })
    .to_string();

    match decode_frame(&text).expect("decode") {
        DecodedFrame::Known(ServerFrame::UserStatus(status)) => {
            assert_eq!(status.user_id, user_id);
            assert!(status.is_online);
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}

#[test]
fn decodes_delivery_update_frame() {
    let text = json!({
        "type": "delivery_update",
        "data": { "message_id": "6f9619ff-8b86-d011-b42d-00cf4fc964ff", "status": "read" },
    })
    .to_string();

    let DecodedFrame::Known(frame) = decode_frame(&text).expect("decode") else {
        panic!("expected known frame");
    };
    assert_eq!(frame.kind(), DELIVERY_UPDATE);
    let ServerFrame::DeliveryUpdate(update) = frame else {
        panic!("expected delivery update");
    };
    assert_eq!(update.status, DeliveryStatus::Read);
}

#[test]
fn unknown_kind_is_not_an_error() {
    let decoded = decode_frame(r#"{"type":"pong","data":null}"#).expect("decode");
    assert_eq!(decoded, DecodedFrame::Unknown("pong".into()));
}

#[test]
fn malformed_json_is_a_decode_error() {
    assert!(matches!(
        decode_frame("{not json"),
        Err(DecodeError::Malformed(_))
    ));
}

#[test]
fn known_kind_with_bad_payload_is_a_payload_error() {
    let err = decode_frame(r#"{"type":"new_message","data":{"id":"nope"}}"#)
        .expect_err("bad payload");
    assert!(matches!(err, DecodeError::Payload { ref kind, .. } if kind == NEW_MESSAGE));
}

#[test]
fn splits_coalesced_frames() {
    let text = "{\"type\":\"ping\"}\n\n  {\"type\":\"pong\"}  \n";
    let frames: Vec<_> = split_frames(text).collect();
    assert_eq!(frames, vec!["{\"type\":\"ping\"}", "{\"type\":\"pong\"}"]);
}
