use thiserror::Error;

/// Per-event failures. Each is reported only to the socket that sent the
/// event; `Display` is the `error` string the client sees.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid message format")]
    Malformed(#[from] serde_json::Error),

    #[error("Missing otherUserId")]
    MissingPeer,

    #[error("Message must contain text or media")]
    EmptyMessage,

    #[error("Media messages need both media_url and media_type")]
    PartialMedia,

    #[error("senderId does not match the connected user")]
    SenderMismatch,

    #[error("Failed to send message")]
    SendFailed,

    #[error("Failed to mark message as read")]
    MarkReadFailed,

    #[error("Failed to get chat history")]
    HistoryFailed,
}
