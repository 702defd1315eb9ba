use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use coach_types::events::ServerEvent;
use coach_types::models::UserId;

/// Outbound half of a live socket. Events pushed here are written to the
/// client by that socket's send task.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Routing table: one live socket per user.
///
/// A newer handshake for the same user replaces the entry (last connect wins).
/// Entries carry a connection id so a superseded socket closing later cannot
/// remove the entry that replaced it.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    /// user_id -> (conn_id, sender)
    connections: RwLock<HashMap<UserId, (Uuid, EventSender)>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `tx` the routing entry for `user_id`. Returns the new conn_id.
    pub async fn register(&self, user_id: UserId, tx: EventSender) -> Uuid {
        let conn_id = Uuid::new_v4();
        let previous = self
            .inner
            .connections
            .write()
            .await
            .insert(user_id, (conn_id, tx));
        if previous.is_some() {
            tracing::debug!("user {} reconnected, previous socket superseded", user_id);
        }
        conn_id
    }

    /// Re-point an existing user's entry at `tx` under the same conn_id.
    /// Used by the legacy `auth` command after the socket was superseded.
    pub async fn reclaim(&self, user_id: UserId, conn_id: Uuid, tx: EventSender) {
        self.inner
            .connections
            .write()
            .await
            .insert(user_id, (conn_id, tx));
    }

    /// Remove the entry for `user_id`, but only if conn_id matches.
    /// Returns whether an entry was removed.
    pub async fn unregister(&self, user_id: UserId, conn_id: Uuid) -> bool {
        let mut connections = self.inner.connections.write().await;
        match connections.get(&user_id) {
            Some((stored_conn_id, _)) if *stored_conn_id == conn_id => {
                connections.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Send a targeted event to a specific user.
    /// Returns whether the user currently had a live socket.
    pub async fn send_to_user(&self, user_id: UserId, event: ServerEvent) -> bool {
        let connections = self.inner.connections.read().await;
        match connections.get(&user_id) {
            Some((_, tx)) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Send an event to every connected user. Returns how many were reached.
    pub async fn broadcast(&self, event: ServerEvent) -> usize {
        let connections = self.inner.connections.read().await;
        connections
            .values()
            .filter(|(_, tx)| tx.send(event.clone()).is_ok())
            .count()
    }

    pub async fn is_connected(&self, user_id: UserId) -> bool {
        self.inner.connections.read().await.contains_key(&user_id)
    }

    pub async fn connected_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    /// Connected user ids, ascending.
    pub async fn connected_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.inner.connections.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> ServerEvent {
        ServerEvent::Pong { timestamp: 1 }
    }

    #[tokio::test]
    async fn send_to_offline_user_reports_unreachable() {
        let registry = Registry::new();
        assert!(!registry.send_to_user(99, pong()).await);
    }

    #[tokio::test]
    async fn last_connect_wins() {
        let registry = Registry::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        let old_conn = registry.register(1, old_tx).await;
        let new_conn = registry.register(1, new_tx).await;
        assert_ne!(old_conn, new_conn);
        assert_eq!(registry.connected_count().await, 1);

        assert!(registry.send_to_user(1, pong()).await);
        assert_eq!(new_rx.try_recv().unwrap(), pong());
        assert!(old_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_close_keeps_newer_entry() {
        let registry = Registry::new();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, _new_rx) = mpsc::unbounded_channel();

        let old_conn = registry.register(1, old_tx).await;
        let new_conn = registry.register(1, new_tx).await;

        assert!(!registry.unregister(1, old_conn).await);
        assert!(registry.is_connected(1).await);

        assert!(registry.unregister(1, new_conn).await);
        assert!(!registry.is_connected(1).await);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_live_socket() {
        let registry = Registry::new();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        let (c_tx, c_rx) = mpsc::unbounded_channel();
        registry.register(3, a_tx).await;
        registry.register(1, b_tx).await;
        registry.register(2, c_tx).await;
        drop(c_rx);

        assert_eq!(registry.broadcast(pong()).await, 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
        assert_eq!(registry.connected_user_ids().await, vec![1, 2, 3]);
    }
}
