use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Numeric user identity, as issued by the user store.
pub type UserId = i64;

/// Message identity, monotonically assigned by the message store.
pub type MessageId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// Media attached to a chat message. The relay only carries references;
/// uploads happen elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub url: String,
    pub kind: MediaKind,
    pub thumbnail: Option<String>,
}

/// A message that has not been persisted yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub media: Option<Media>,
}

/// A persisted chat message as it travels over the wire.
///
/// `read_at` is `None` until the receiver marks the message read, and is never
/// cleared afterwards. `sender_name` is only filled in for chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    #[serde(default)]
    pub text: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

impl ChatMessage {
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

    pub fn is_read(&self) -> bool {
        self.read_at.is_some()
    }
}
