//! Live connection registry and presence.
//!
//! At most one transport is registered per user. Binding a second one
//! replaces the first; the replaced transport is told to close when
//! `close_superseded` is set. Only this module flips the `online` flag.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use minichat_shared::protocol::ServerEvent;
use minichat_shared::types::UserId;
use minichat_store::Store;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Item queued for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Pong(Bytes),
    Close,
}

pub type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// The writer side of one live transport.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    tx: OutboundTx,
}

impl ConnectionHandle {
    #[cfg(test)]
    pub fn new(tx: OutboundTx) -> Self {
        Self::with_id(Uuid::new_v4(), tx)
    }

    pub fn with_id(conn_id: Uuid, tx: OutboundTx) -> Self {
        Self { conn_id, tx }
    }

    /// Queue an event. `false` if the writer is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(Outbound::Event(event)).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    conns: Arc<RwLock<HashMap<UserId, ConnectionHandle>>>,
    store: Store,
    close_superseded: bool,
}

impl ConnectionRegistry {
    pub fn new(store: Store, close_superseded: bool) -> Self {
        Self {
            conns: Arc::new(RwLock::new(HashMap::new())),
            store,
            close_superseded,
        }
    }

    /// Register `handle` as the live transport of `user`, mark the user
    /// online and tell everyone else.
    pub async fn bind(&self, user: &UserId, handle: ConnectionHandle) {
        let conn_id = handle.conn_id;
        let previous = self.conns.write().await.insert(user.clone(), handle);

        if let Some(previous) = previous.filter(|p| p.conn_id != conn_id) {
            if self.close_superseded {
                debug!(user = %user, conn = %previous.conn_id, "closing superseded connection");
                previous.close();
            } else {
                debug!(user = %user, conn = %previous.conn_id, "connection superseded");
            }
        }

        self.store.write(|s| s.set_presence(user, true)).await;
        self.store.schedule_save();

        info!(user = %user, conn = %conn_id, "user online");
        self.broadcast(ServerEvent::UserOnline { user_id: user.clone() }, Some(user))
            .await;
    }

    /// Remove `user`'s entry if it still belongs to `conn_id`, mark the
    /// user offline and tell everyone. Returns whether anything was removed.
    pub async fn unbind(&self, user: &UserId, conn_id: Uuid) -> bool {
        {
            let mut conns = self.conns.write().await;
            match conns.get(user) {
                Some(h) if h.conn_id == conn_id => {
                    conns.remove(user);
                }
                _ => return false,
            }
        }

        self.store.write(|s| s.set_presence(user, false)).await;
        self.store.schedule_save();

        info!(user = %user, conn = %conn_id, "user offline");
        self.broadcast(ServerEvent::UserOffline { user_id: user.clone() }, None)
            .await;
        true
    }

    /// Best-effort delivery. Returns whether `user` had a live transport
    /// that accepted the event.
    pub async fn send_to(&self, user: &UserId, event: ServerEvent) -> bool {
        let conns = self.conns.read().await;
        match conns.get(user) {
            Some(handle) => {
                let sent = handle.send(event);
                if !sent {
                    debug!(user = %user, "dropping event for closed connection");
                }
                sent
            }
            None => false,
        }
    }

    /// Deliver to each listed user that is connected. Returns the number of
    /// deliveries.
    pub async fn send_to_many<'a>(
        &self,
        users: impl IntoIterator<Item = &'a UserId>,
        event: &ServerEvent,
    ) -> usize {
        let conns = self.conns.read().await;
        users
            .into_iter()
            .filter_map(|u| conns.get(u))
            .filter(|h| h.send(event.clone()))
            .count()
    }

    /// Deliver to every connected user except `exclude`.
    pub async fn broadcast(&self, event: ServerEvent, exclude: Option<&UserId>) {
        let conns = self.conns.read().await;
        for (user, handle) in conns.iter() {
            if Some(user) != exclude {
                handle.send(event.clone());
            }
        }
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.conns.read().await.contains_key(user)
    }

    pub async fn online_count(&self) -> usize {
        self.conns.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_user, drain, temp_store};

    #[tokio::test]
    async fn bind_marks_online_and_notifies_others() {
        let (_dir, store) = temp_store().await;
        let registry = ConnectionRegistry::new(store.clone(), true);
        let (a, b) = (add_user(&store, "anna").await, add_user(&store, "boris").await);

        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        registry.bind(&a, ConnectionHandle::new(tx_a)).await;
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        registry.bind(&b, ConnectionHandle::new(tx_b)).await;

        assert!(store.read(|s| s.user(&b).unwrap().online).await);
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::UserOnline { user_id: b.clone() }]
        );
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(registry.online_count().await, 2);
    }

    #[tokio::test]
    async fn rebind_closes_previous_and_stale_unbind_is_ignored() {
        let (_dir, store) = temp_store().await;
        let registry = ConnectionRegistry::new(store.clone(), true);
        let a = add_user(&store, "anna").await;

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let first = ConnectionHandle::new(tx1);
        let first_id = first.conn_id;
        registry.bind(&a, first).await;

        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let second = ConnectionHandle::new(tx2);
        let second_id = second.conn_id;
        registry.bind(&a, second).await;

        assert!(matches!(rx1.try_recv(), Ok(Outbound::Close)));

        assert!(!registry.unbind(&a, first_id).await);
        assert!(registry.is_online(&a).await);
        assert!(store.read(|s| s.user(&a).unwrap().online).await);

        assert!(registry.send_to(&a, ServerEvent::error("x")).await);
        assert!(matches!(rx2.try_recv(), Ok(Outbound::Event(_))));

        assert!(registry.unbind(&a, second_id).await);
        assert!(!registry.is_online(&a).await);
        assert!(!store.read(|s| s.user(&a).unwrap().online).await);
    }

    #[tokio::test]
    async fn send_to_offline_or_dead_transport_reports_false() {
        let (_dir, store) = temp_store().await;
        let registry = ConnectionRegistry::new(store.clone(), false);
        let a = add_user(&store, "anna").await;

        assert!(!registry.send_to(&a, ServerEvent::error("x")).await);

        let (tx, rx) = mpsc::unbounded_channel();
        registry.bind(&a, ConnectionHandle::new(tx)).await;
        drop(rx);
        assert!(!registry.send_to(&a, ServerEvent::error("x")).await);
    }
}
