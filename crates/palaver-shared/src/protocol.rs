//! JSON wire protocol between clients and the relay.
//!
//! Inbound frames are tagged on `action`, outbound frames on `type`; both
//! travel as one JSON object per WebSocket text message.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::EventRecord;
use crate::types::{ChatId, MessageKind, UserId};

/// Frames a client may send to the relay.
///
/// Anything that fails to parse into one of these is a protocol error: the
/// relay answers with [`ServerFrame::Error`] and keeps the connection open.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Present a bearer credential.  Exactly one of these is accepted per
    /// connection, and nothing else is accepted before it succeeds.
    Authenticate { credential: String },

    /// Join a conversation topic for live delivery.
    Subscribe { chat_id: ChatId },

    /// Leave a conversation topic.
    Unsubscribe { chat_id: ChatId },

    /// Submit a message to a conversation.
    Send {
        chat_id: ChatId,
        kind: MessageKind,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mentions: Option<Vec<UserId>>,
    },

    /// Keep-alive; answered with [`ServerFrame::Pong`].
    Ping {},
}

/// Frames the relay may push to a client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Outcome of the authentication handshake.
    AuthResult {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    SubscribeResult { ok: bool, chat_id: ChatId },

    UnsubscribeResult { ok: bool, chat_id: ChatId },

    /// A delivered event (new message, recall, delete, read receipt).
    Event { event: EventRecord },

    /// Periodic count of distinct online identities.
    Presence { online: usize },

    Pong { ts: i64 },

    /// Protocol or authorization failure; the connection stays open.
    Error { message: String },
}

impl ServerFrame {
    pub fn auth_ok(user_id: UserId) -> Self {
        ServerFrame::AuthResult {
            ok: true,
            user_id: Some(user_id),
            error: None,
        }
    }

    pub fn auth_failed(error: impl Into<String>) -> Self {
        ServerFrame::AuthResult {
            ok: false,
            user_id: None,
            error: Some(error.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frame_round_trip() {
        let frame = ClientFrame::Send {
            chat_id: ChatId(4),
            kind: MessageKind::Text,
            content: "hello".into(),
            reply_to: None,
            mentions: Some(vec![UserId(9)]),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"action\":\"send\""));
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn authenticate_parses_from_raw_json() {
        let frame: ClientFrame =
            serde_json::from_str(r#"{"action":"authenticate","credential":"abc123"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Authenticate {
                credential: "abc123".into()
            }
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        let parsed = serde_json::from_str::<ClientFrame>(r#"{"action":"shout","text":"hi"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn auth_result_omits_empty_fields() {
        let json = serde_json::to_string(&ServerFrame::auth_failed("bad token")).unwrap();
        assert!(json.contains("\"ok\":false"));
        assert!(!json.contains("user_id"));
    }

    #[test]
    fn server_frame_tag_is_type() {
        let json = serde_json::to_string(&ServerFrame::Presence { online: 3 }).unwrap();
        assert_eq!(json, r#"{"type":"presence","online":3}"#);
    }
}
