use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use coach_types::events::{ClientCommand, SendMessageData, ServerEvent};
use coach_types::models::{MessageId, NewMessage, UserId};

use crate::error::RelayError;
use crate::registry::{EventSender, Registry};
use crate::store::{MessageStore, UserDirectory};

const UNKNOWN_USER: &str = "Unknown User";

/// One accepted socket: who it belongs to and how to answer it.
///
/// Replies always go through `tx`, not through the registry, so a socket that
/// has been superseded by a newer handshake still gets answers to its own
/// requests.
#[derive(Clone)]
pub struct Connection {
    pub user_id: UserId,
    pub conn_id: Uuid,
    tx: EventSender,
}

impl Connection {
    pub fn reply(&self, event: ServerEvent) {
        if self.tx.send(event).is_err() {
            debug!("user {} socket already closed, reply dropped", self.user_id);
        }
    }
}

/// Routes chat events between connected users and persists them through the
/// store collaborator. Cheap to clone; all clones share one registry.
#[derive(Clone)]
pub struct Relay {
    registry: Registry,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn UserDirectory>,
}

impl Relay {
    pub fn new(store: Arc<dyn MessageStore>, directory: Arc<dyn UserDirectory>) -> Self {
        Self {
            registry: Registry::new(),
            store,
            directory,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register `tx` as the live socket for `user_id` and acknowledge it.
    pub async fn accept(&self, user_id: UserId, tx: EventSender) -> Connection {
        let conn_id = self.registry.register(user_id, tx.clone()).await;
        let conn = Connection {
            user_id,
            conn_id,
            tx,
        };
        conn.reply(ServerEvent::Connected {
            user_id,
            message: "Successfully connected to chat relay".into(),
        });
        let online = self.registry.connected_count().await;
        info!("user {} connected ({} online)", user_id, online);
        conn
    }

    /// Drop the routing entry for a closing socket, unless a newer socket
    /// already replaced it.
    pub async fn disconnect(&self, conn: &Connection) {
        if self.registry.unregister(conn.user_id, conn.conn_id).await {
            info!("user {} disconnected", conn.user_id);
        } else {
            debug!("user {} stale socket closed, newer connection kept", conn.user_id);
        }
    }

    pub async fn send_to_user(&self, user_id: UserId, event: ServerEvent) -> bool {
        self.registry.send_to_user(user_id, event).await
    }

    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        self.registry.broadcast(event).await
    }

    /// Handle one raw text frame from `conn`. Failures are answered with an
    /// `error` event on that socket only.
    pub async fn handle_frame(&self, conn: &Connection, text: &str) {
        let result = match serde_json::from_str::<serde_json::Value>(text) {
            Ok(value) => {
                let kind = value
                    .get("type")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_owned);
                // Valid JSON with no kind (including non-objects) gets no reply
                if kind.is_none() {
                    info!("user {} sent a frame without a message type", conn.user_id);
                    return;
                }
                match serde_json::from_value::<ClientCommand>(value) {
                    Ok(ClientCommand::Unknown) => {
                        info!("user {} sent unknown message type {:?}", conn.user_id, kind);
                        Ok(())
                    }
                    Ok(cmd) => self.handle(conn, cmd).await,
                    Err(e) => Err(RelayError::Malformed(e)),
                }
            }
            Err(e) => Err(RelayError::Malformed(e)),
        };

        if let Err(e) = result {
            warn!(
                "user {} request failed: {} -- raw: {}",
                conn.user_id,
                e,
                text.chars().take(200).collect::<String>()
            );
            conn.reply(ServerEvent::error(e.to_string()));
        }
    }

    /// Dispatch a parsed command. Each command runs to completion before the
    /// caller reads the next frame, which keeps one sender's messages in order.
    pub async fn handle(&self, conn: &Connection, cmd: ClientCommand) -> Result<(), RelayError> {
        match cmd {
            ClientCommand::SendMessage { data } => self.send_message(conn, data).await,
            ClientCommand::MarkRead { message_id } => self.mark_read(conn, message_id).await,
            ClientCommand::GetChatHistory { data } => {
                let other_user_id = data
                    .and_then(|d| d.other_user_id)
                    .ok_or(RelayError::MissingPeer)?;
                self.chat_history(conn, other_user_id).await
            }
            ClientCommand::Ping => {
                conn.reply(ServerEvent::Pong {
                    timestamp: chrono::Utc::now().timestamp_millis(),
                });
                Ok(())
            }
            ClientCommand::Auth => {
                self.registry
                    .reclaim(conn.user_id, conn.conn_id, conn.tx.clone())
                    .await;
                conn.reply(ServerEvent::AuthSuccess);
                Ok(())
            }
            ClientCommand::Unknown => Ok(()),
        }
    }

    async fn send_message(&self, conn: &Connection, data: SendMessageData) -> Result<(), RelayError> {
        if data.sender_id.is_some_and(|id| id != conn.user_id) {
            return Err(RelayError::SenderMismatch);
        }
        if data.has_partial_media() {
            return Err(RelayError::PartialMedia);
        }
        let media = data.media();
        if data.text.is_empty() && media.is_none() {
            return Err(RelayError::EmptyMessage);
        }

        let receiver_id = data.receiver_id;
        let new = NewMessage {
            sender_id: conn.user_id,
            receiver_id,
            text: data.text,
            media,
        };

        let store = self.store.clone();
        let directory = self.directory.clone();
        let message = blocking(move || {
            let mut message = store.store(new)?;
            // Already persisted, so a directory failure only costs the name
            message.sender_name = match directory.resolve_name(message.sender_id) {
                Ok(name) => Some(name.unwrap_or_else(|| UNKNOWN_USER.to_string())),
                Err(e) => {
                    warn!("could not resolve name of user {}: {:#}", message.sender_id, e);
                    None
                }
            };
            Ok(message)
        })
        .await
        .map_err(|e| {
            error!("user {} failed to store message: {:#}", conn.user_id, e);
            RelayError::SendFailed
        })?;

        let delivered = self
            .registry
            .send_to_user(
                receiver_id,
                ServerEvent::NewMessage {
                    message: message.clone(),
                },
            )
            .await;
        debug!(
            "message {} {} -> {} ({})",
            message.id,
            conn.user_id,
            receiver_id,
            if delivered { "delivered" } else { "receiver offline" }
        );

        conn.reply(ServerEvent::MessageSent { message });
        Ok(())
    }

    async fn mark_read(&self, conn: &Connection, message_id: MessageId) -> Result<(), RelayError> {
        let store = self.store.clone();
        let success = blocking(move || store.mark_read(message_id))
            .await
            .map_err(|e| {
                error!("user {} failed to mark message {} read: {:#}", conn.user_id, message_id, e);
                RelayError::MarkReadFailed
            })?;

        conn.reply(ServerEvent::MessageRead {
            message_id,
            success,
        });

        if success {
            self.notify_sender_of_read(conn, message_id).await;
        }
        Ok(())
    }

    /// Tell the message's original sender it was read. The requester has
    /// already been answered, so failures here are only logged.
    async fn notify_sender_of_read(&self, conn: &Connection, message_id: MessageId) {
        let store = self.store.clone();
        let message = match blocking(move || store.get_message(message_id)).await {
            Ok(Some(message)) => message,
            Ok(None) => return,
            Err(e) => {
                warn!("could not look up sender of message {}: {:#}", message_id, e);
                return;
            }
        };

        if message.sender_id != conn.user_id {
            self.registry
                .send_to_user(
                    message.sender_id,
                    ServerEvent::MessageRead {
                        message_id,
                        success: true,
                    },
                )
                .await;
        }
    }

    async fn chat_history(&self, conn: &Connection, other_user_id: UserId) -> Result<(), RelayError> {
        let store = self.store.clone();
        let directory = self.directory.clone();
        let user_id = conn.user_id;

        let messages = blocking(move || {
            let mut messages = store.fetch_history(user_id, other_user_id)?;
            let mut names: HashMap<UserId, String> = HashMap::new();
            for message in &mut messages {
                let name = match names.get(&message.sender_id) {
                    Some(name) => name.clone(),
                    None => {
                        let name = directory
                            .resolve_name(message.sender_id)?
                            .unwrap_or_else(|| UNKNOWN_USER.to_string());
                        names.insert(message.sender_id, name.clone());
                        name
                    }
                };
                message.sender_name = Some(name);
            }
            Ok(messages)
        })
        .await
        .map_err(|e| {
            error!("user {} failed to load history with {}: {:#}", user_id, other_user_id, e);
            RelayError::HistoryFailed
        })?;

        conn.reply(ServerEvent::ChatHistory {
            messages,
            other_user_id,
        });
        Ok(())
    }
}

/// Run blocking persistence work off the async runtime.
async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| anyhow!("spawn_blocking join error: {}", e))?
}
