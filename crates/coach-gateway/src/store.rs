//! Collaborator interfaces the relay persists through, and their SQLite
//! implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use tracing::warn;

use coach_db::Database;
use coach_db::models::{MessageRow, NewMessageRow};
use coach_types::models::{ChatMessage, MediaKind, MessageId, NewMessage, UserId};

/// Message persistence. Implementations are blocking; the relay calls them
/// from `spawn_blocking`.
pub trait MessageStore: Send + Sync + 'static {
    /// Persist a message, assigning its id and creation time.
    fn store(&self, message: NewMessage) -> Result<ChatMessage>;

    /// Conversation between two users in both directions, oldest first.
    fn fetch_history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<ChatMessage>>;

    /// Set `read_at` if unset. `Ok(false)` means no such message.
    fn mark_read(&self, id: MessageId) -> Result<bool>;

    fn get_message(&self, id: MessageId) -> Result<Option<ChatMessage>>;
}

/// Display names for chat participants.
pub trait UserDirectory: Send + Sync + 'static {
    fn resolve_name(&self, user_id: UserId) -> Result<Option<String>>;
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str, message_id: i64) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite's datetime('now') has no timezone; treat as UTC.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on message {}: {}", raw, message_id, e);
            DateTime::default()
        })
}

fn message_from_row(row: MessageRow) -> ChatMessage {
    let media_type = row.media_type.as_deref().and_then(|kind| {
        let parsed = MediaKind::parse(kind);
        if parsed.is_none() {
            warn!("Unknown media_type '{}' on message {}", kind, row.id);
        }
        parsed
    });

    ChatMessage {
        id: row.id,
        sender_id: row.sender_id,
        receiver_id: row.receiver_id,
        created_at: parse_timestamp(&row.sent_at, row.id),
        read_at: row.read_at.as_deref().map(|raw| parse_timestamp(raw, row.id)),
        text: row.text,
        media_url: row.media_url,
        media_type,
        media_thumbnail: row.media_thumbnail,
        sender_name: None,
    }
}

impl MessageStore for Database {
    fn store(&self, message: NewMessage) -> Result<ChatMessage> {
        // Millisecond precision so the returned message equals the stored one.
        let created_at = Utc::now().trunc_subsecs(3);
        let sent_at = format_timestamp(created_at);
        let media = message.media.as_ref();

        let id = self.insert_message(&NewMessageRow {
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: &message.text,
            media_url: media.map(|m| m.url.as_str()),
            media_type: media.map(|m| m.kind.as_str()),
            media_thumbnail: media.and_then(|m| m.thumbnail.as_deref()),
            sent_at: &sent_at,
        })?;

        let media = message.media;
        Ok(ChatMessage {
            id,
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            text: message.text,
            created_at,
            read_at: None,
            media_type: media.as_ref().map(|m| m.kind),
            media_thumbnail: media.as_ref().and_then(|m| m.thumbnail.clone()),
            media_url: media.map(|m| m.url),
            sender_name: None,
        })
    }

    fn fetch_history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<ChatMessage>> {
        let rows = self.get_conversation(user_a, user_b)?;
        Ok(rows.into_iter().map(message_from_row).collect())
    }

    fn mark_read(&self, id: MessageId) -> Result<bool> {
        let read_at = format_timestamp(Utc::now().trunc_subsecs(3));
        self.mark_message_read(id, &read_at)
    }

    fn get_message(&self, id: MessageId) -> Result<Option<ChatMessage>> {
        Ok(Database::get_message(self, id)?.map(message_from_row))
    }
}

impl UserDirectory for Database {
    fn resolve_name(&self, user_id: UserId) -> Result<Option<String>> {
        self.get_user_name(user_id)
            .with_context(|| format!("resolving name for user {}", user_id))
    }
}
