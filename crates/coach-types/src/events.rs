use serde::{Deserialize, Serialize};

use crate::models::{ChatMessage, Media, MediaKind, MessageId, UserId};

/// Commands sent FROM client TO relay over the chat socket.
///
/// Frames are flat JSON objects tagged by `type`. Payload-carrying commands
/// nest their arguments under `data`, except `mark_read` which keeps
/// `messageId` at the top level.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Send a chat message (text and/or media) to another user
    SendMessage { data: SendMessageData },

    /// Mark a received message as read
    MarkRead {
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },

    /// Fetch the conversation with another user, oldest first
    GetChatHistory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<HistoryRequest>,
    },

    /// Application-level liveness probe
    Ping,

    /// Legacy re-authentication: re-claim the routing entry for this socket
    Auth,

    /// Any `type` this relay does not understand
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendMessageData {
    #[serde(rename = "senderId", default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
    #[serde(rename = "receiverId")]
    pub receiver_id: UserId,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_thumbnail: Option<String>,
}

impl SendMessageData {
    pub fn text(sender_id: UserId, receiver_id: UserId, text: impl Into<String>) -> Self {
        Self {
            sender_id: Some(sender_id),
            receiver_id,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: Media) -> Self {
        self.media_url = Some(media.url);
        self.media_type = Some(media.kind);
        self.media_thumbnail = media.thumbnail;
        self
    }

    /// The attached media, if both url and kind are present.
    pub fn media(&self) -> Option<Media> {
        match (&self.media_url, self.media_type) {
            (Some(url), Some(kind)) => Some(Media {
                url: url.clone(),
                kind,
                thumbnail: self.media_thumbnail.clone(),
            }),
            _ => None,
        }
    }

    /// True when only one of `media_url` / `media_type` was given.
    pub fn has_partial_media(&self) -> bool {
        self.media_url.is_some() != self.media_type.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryRequest {
    #[serde(rename = "otherUserId", default, skip_serializing_if = "Option::is_none")]
    pub other_user_id: Option<UserId>,
}

/// Events sent FROM relay TO client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Handshake accepted; the socket is now the routing entry for `user_id`
    Connected { user_id: UserId, message: String },

    /// A message addressed to this user was just persisted
    NewMessage { message: ChatMessage },

    /// Acknowledges the sender's own message with its persisted form
    MessageSent { message: ChatMessage },

    /// Result of a mark-read request, also sent to the original sender
    MessageRead { message_id: MessageId, success: bool },

    /// Conversation with `other_user_id`, oldest first
    ChatHistory {
        messages: Vec<ChatMessage>,
        other_user_id: UserId,
    },

    /// Reply to `ping`; server time in epoch milliseconds
    Pong { timestamp: i64 },

    /// Reply to the legacy `auth` command
    AuthSuccess,

    /// A request from this socket failed
    Error { error: String },
}

impl ServerEvent {
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Wire `type` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::NewMessage { .. } => "new_message",
            Self::MessageSent { .. } => "message_sent",
            Self::MessageRead { .. } => "message_read",
            Self::ChatHistory { .. } => "chat_history",
            Self::Pong { .. } => "pong",
            Self::AuthSuccess => "auth_success",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_client_frames() {
        let cmd: ClientCommand = serde_json::from_value(json!({
            "type": "send_message",
            "data": { "senderId": 1, "receiverId": 2, "text": "hi" }
        }))
        .unwrap();
        match cmd {
            ClientCommand::SendMessage { data } => {
                assert_eq!(data.sender_id, Some(1));
                assert_eq!(data.receiver_id, 2);
                assert_eq!(data.text, "hi");
                assert!(data.media().is_none());
            }
            other => panic!("unexpected {:?}", other),
        }

        let cmd: ClientCommand =
            serde_json::from_value(json!({ "type": "mark_read", "messageId": 7 })).unwrap();
        assert!(matches!(cmd, ClientCommand::MarkRead { message_id: 7 }));

        let cmd: ClientCommand = serde_json::from_value(json!({ "type": "ping" })).unwrap();
        assert!(matches!(cmd, ClientCommand::Ping));
    }

    #[test]
    fn history_without_peer_still_parses() {
        let cmd: ClientCommand =
            serde_json::from_value(json!({ "type": "get_chat_history" })).unwrap();
        assert!(matches!(cmd, ClientCommand::GetChatHistory { data: None }));

        let cmd: ClientCommand =
            serde_json::from_value(json!({ "type": "get_chat_history", "data": {} })).unwrap();
        match cmd {
            ClientCommand::GetChatHistory { data: Some(req) } => {
                assert!(req.other_user_id.is_none())
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_type_maps_to_unknown() {
        let cmd: ClientCommand =
            serde_json::from_value(json!({ "type": "typing", "data": { "x": 1 } })).unwrap();
        assert!(matches!(cmd, ClientCommand::Unknown));
    }

    #[test]
    fn media_payload() {
        let cmd: ClientCommand = serde_json::from_value(json!({
            "type": "send_message",
            "data": {
                "senderId": 2,
                "receiverId": 1,
                "text": "",
                "media_url": "https://cdn.example/p.jpg",
                "media_type": "image"
            }
        }))
        .unwrap();
        let ClientCommand::SendMessage { data } = cmd else {
            panic!("expected send_message");
        };
        let media = data.media().unwrap();
        assert_eq!(media.kind, MediaKind::Image);
        assert!(media.thumbnail.is_none());
        assert!(!data.has_partial_media());
    }

    #[test]
    fn server_events_use_camel_case_fields() {
        let v = serde_json::to_value(ServerEvent::Connected {
            user_id: 3,
            message: "ok".into(),
        })
        .unwrap();
        assert_eq!(v, json!({ "type": "connected", "userId": 3, "message": "ok" }));

        let v = serde_json::to_value(ServerEvent::MessageRead {
            message_id: 9,
            success: false,
        })
        .unwrap();
        assert_eq!(v, json!({ "type": "message_read", "messageId": 9, "success": false }));

        let v = serde_json::to_value(ServerEvent::ChatHistory {
            messages: vec![],
            other_user_id: 2,
        })
        .unwrap();
        assert_eq!(v, json!({ "type": "chat_history", "messages": [], "otherUserId": 2 }));

        let v = serde_json::to_value(ServerEvent::error("boom")).unwrap();
        assert_eq!(v, json!({ "type": "error", "error": "boom" }));
    }

    #[test]
    fn message_fields_stay_snake_case() {
        let msg = ChatMessage {
            id: 1,
            sender_id: 1,
            receiver_id: 2,
            text: "hi".into(),
            created_at: chrono::Utc::now(),
            read_at: None,
            media_url: None,
            media_type: None,
            media_thumbnail: None,
            sender_name: None,
        };
        let v = serde_json::to_value(ServerEvent::NewMessage { message: msg }).unwrap();
        assert_eq!(v["type"], "new_message");
        assert_eq!(v["message"]["sender_id"], 1);
        assert_eq!(v["message"]["receiver_id"], 2);
        assert!(v["message"]["read_at"].is_null());
        assert!(v["message"].get("media_url").is_none());
    }
}
