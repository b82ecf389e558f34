//! JSON protocol for the real-time group room.
//!
//! One text frame per event, discriminated by `type`:
//! ```text
//! client → server   {"type":"chat","body":"hi"}
//!                   {"type":"typing","is_typing":true}
//!
//! server → client   {"type":"snapshot","users":[{"id":1,"name":"Ada"}]}        (private, on connect)
//!                   {"type":"presence","action":"join","user":{"id":2,"name":"Bo"}}
//!                   {"type":"typing","user":{…},"is_typing":true}
//!                   {"type":"chat","id":7,"sender":1,"sender_name":"Ada","body":"hi",
//!                    "created_at":"2024-05-01T10:00:00Z","reply_to":null}
//!                   {"type":"message_deleted","id":7}
//!                   {"type":"error","code":"storage","message":"…"}              (private)
//! ```

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;
use crate::model::{ChatMessage, Member};

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat {
        body: String,
        #[serde(default)]
        reply_to: Option<MessageId>,
    },
    Typing {
        is_typing: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Join,
    Leave,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Snapshot {
        users: Vec<Member>,
    },
    Presence {
        action: PresenceAction,
        user: Member,
    },
    Typing {
        user: Member,
        is_typing: bool,
    },
    Chat(ChatMessage),
    MessageDeleted {
        id: MessageId,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    pub fn join(user: Member) -> Self {
        ServerFrame::Presence {
            action: PresenceAction::Join,
            user,
        }
    }

    pub fn leave(user: Member) -> Self {
        ServerFrame::Presence {
            action: PresenceAction::Leave,
            user,
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

impl ClientFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::SerializationError(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::DeserializationError(e.to_string()))
    }
}

/// Protocol errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolError {
    SerializationError(String),
    DeserializationError(String),
    /// Binary or otherwise unexpected frame.
    InvalidFrame,
    ConnectionClosed,
    /// Handshake or membership check refused the connection.
    Rejected(String),
    Timeout,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SerializationError(e) => write!(f, "Serialization error: {e}"),
            Self::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            Self::InvalidFrame => write!(f, "Invalid frame"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::Rejected(reason) => write!(f, "Connection rejected: {reason}"),
            Self::Timeout => write!(f, "Connection timeout"),
        }
    }
}

impl std::error::Error for ProtocolError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::UserId;
    use crate::model::ReplyRef;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};

    #[test]
    fn test_client_chat_decode() {
        let frame = ClientFrame::decode(r#"{"type":"chat","body":"hello"}"#).unwrap();
        assert_eq!(
            frame,
            ClientFrame::Chat {
                body: "hello".into(),
                reply_to: None
            }
        );

        let reply = ClientFrame::decode(r#"{"type":"chat","body":"yes","reply_to":4}"#).unwrap();
        assert!(matches!(reply, ClientFrame::Chat { reply_to: Some(MessageId(4)), .. }));
    }

    #[test]
    fn test_client_typing_decode() {
        let frame = ClientFrame::decode(r#"{"type":"typing","is_typing":true}"#).unwrap();
        assert_eq!(frame, ClientFrame::Typing { is_typing: true });
    }

    #[test]
    fn test_malformed_client_frames() {
        assert!(ClientFrame::decode("not json").is_err());
        assert!(ClientFrame::decode(r#"{"type":"dance"}"#).is_err());
        assert!(ClientFrame::decode(r#"{"type":"typing"}"#).is_err());
        assert!(ClientFrame::decode(r#"{"body":"no type"}"#).is_err());
    }

    #[test]
    fn test_snapshot_shape() {
        let frame = ServerFrame::Snapshot {
            users: vec![Member::new(UserId(1), "Ada")],
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "snapshot", "users": [{"id": 1, "name": "Ada"}]})
        );
    }

    #[test]
    fn test_presence_shape() {
        let frame = ServerFrame::leave(Member::new(UserId(2), "Bo"));
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "presence", "action": "leave", "user": {"id": 2, "name": "Bo"}})
        );
    }

    #[test]
    fn test_typing_shape() {
        let frame = ServerFrame::Typing {
            user: Member::new(UserId(2), "Bo"),
            is_typing: false,
        };
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "typing");
        assert_eq!(value["is_typing"], false);
        assert_eq!(value["user"]["id"], 2);
    }

    #[test]
    fn test_chat_shape_and_decode() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let frame = ServerFrame::Chat(ChatMessage {
            id: MessageId(7),
            sender: UserId(1),
            sender_name: "Ada".into(),
            body: "hi".into(),
            created_at,
            reply_to: Some(ReplyRef {
                id: MessageId(3),
                sender: UserId(2),
                body: None,
                deleted: true,
            }),
        });
        let text = frame.encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["id"], 7);
        assert_eq!(value["sender"], 1);
        assert_eq!(value["sender_name"], "Ada");
        assert_eq!(value["body"], "hi");
        assert_eq!(value["created_at"], "2024-05-01T10:00:00Z");
        assert_eq!(value["reply_to"]["deleted"], true);

        assert_eq!(ServerFrame::decode(&text).unwrap(), frame);
    }

    #[test]
    fn test_protocol_error_display() {
        assert_eq!(ProtocolError::InvalidFrame.to_string(), "Invalid frame");
        assert_eq!(
            ProtocolError::Rejected("not a member".into()).to_string(),
            "Connection rejected: not a member"
        );
    }
}
