use std::sync::Arc;

use chrono::{DateTime, Utc};
use minichat_shared::types::{now_millis, UserId};
use minichat_shared::{MinichatError, Result};
use minichat_store::{Store, User};
use tracing::debug;
use uuid::Uuid;

use crate::calls::CallCoordinator;
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::router::{MessageRouter, SaveMode};

/// Application context handed to every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Store,
    pub registry: ConnectionRegistry,
    pub router: MessageRouter,
    pub calls: CallCoordinator,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: ServerConfig, store: Store) -> Self {
        let registry = ConnectionRegistry::new(store.clone(), config.close_superseded);
        let router = MessageRouter::new(store.clone(), registry.clone());
        let calls = CallCoordinator::new(registry.clone(), store.clone());
        Self {
            config: Arc::new(config),
            store,
            registry,
            router,
            calls,
            started_at: Utc::now(),
        }
    }

    /// The user behind a session token.
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        let ttl = self.config.session_ttl_ms();
        self.store
            .read(|s| s.resolve_session(token, ttl, now_millis()).cloned())
            .await
            .ok_or_else(MinichatError::unauthorized)
    }

    pub async fn persist(&self, mode: SaveMode) {
        match mode {
            SaveMode::Sync => self.store.save_now().await,
            SaveMode::Debounced => self.store.schedule_save(),
        }
    }

    /// Tear down everything a closing connection owned. A connection that
    /// was already superseded by a newer one leaves no trace.
    pub async fn disconnect(&self, user: &UserId, conn_id: Uuid) {
        if !self.registry.unbind(user, conn_id).await {
            debug!(user = %user, conn = %conn_id, "superseded connection closed");
            return;
        }
        self.calls.end_calls_for(user).await;
        self.calls.leave_all_group_calls(user).await;
    }
}
