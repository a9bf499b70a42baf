//! Fixtures shared by the server's unit tests.

use minichat_shared::protocol::ServerEvent;
use minichat_shared::types::UserId;
use minichat_store::users::NewUser;
use minichat_store::{Store, StoreOptions};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::config::ServerConfig;
use crate::registry::{ConnectionHandle, Outbound};
use crate::state::AppState;

pub async fn temp_store() -> (TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("database.json"), StoreOptions::default())
        .await
        .unwrap();
    (dir, store)
}

pub async fn test_state() -> (TempDir, AppState) {
    let (dir, store) = temp_store().await;
    let config = ServerConfig {
        db_file: store.path().to_path_buf(),
        ..ServerConfig::default()
    };
    (dir, AppState::new(config, store))
}

/// Every event queued so far, skipping control items.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(item) = rx.try_recv() {
        if let Outbound::Event(event) = item {
            events.push(event);
        }
    }
    events
}

pub async fn add_user(store: &Store, username: &str) -> UserId {
    store
        .write(|s| {
            s.create_user(
                NewUser {
                    username: username.into(),
                    name: username.into(),
                    password_hash: String::new(),
                },
                0,
            )
        })
        .await
        .unwrap()
        .id
}

/// Register `user` with an in-memory transport.
pub async fn connect(state: &AppState, user: &UserId) -> mpsc::UnboundedReceiver<Outbound> {
    let (tx, rx) = mpsc::unbounded_channel();
    state.registry.bind(user, ConnectionHandle::new(tx)).await;
    rx
}
