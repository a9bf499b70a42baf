//! # minichat-server
//!
//! Real-time core of a self-hosted Minichat instance.
//!
//! This binary provides:
//! - **REST API** (axum) for accounts, chats, groups and channels
//! - **WebSocket transport** at `/ws` carrying messaging, presence and
//!   call signaling
//! - **Message routing** with scripted bot replies
//! - **Call coordination** for 1:1 and group calls (signaling only)
//! - **Durable state** as a single JSON document with debounced writes

mod api;
mod bots;
mod calls;
mod config;
mod error;
mod registry;
mod router;
mod state;
mod ws;

#[cfg(test)]
mod test_support;

use minichat_shared::types::now_millis;
use minichat_store::Store;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,minichat_server=debug")),
        )
        .init();

    info!("Starting Minichat server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the state document and wire the subsystems
    // -----------------------------------------------------------------------
    let store = Store::open(&config.db_file, config.store_options()).await?;
    let http_addr = config.http_addr;
    let session_ttl = config.session_ttl_ms();
    let app_state = AppState::new(config, store.clone());

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Expired session cleanup (hourly), only when sessions expire at all
    if let Some(ttl) = session_ttl {
        let store = store.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                interval.tick().await;
                let purged = store.write(|s| s.purge_sessions(ttl, now_millis())).await;
                if purged > 0 {
                    info!(purged, "expired sessions removed");
                    store.schedule_save();
                }
            }
        });
    }

    // -----------------------------------------------------------------------
    // 5. Run the HTTP + WebSocket server until shutdown
    // -----------------------------------------------------------------------
    let result = tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = &result {
                tracing::error!(error = %e, "HTTP server failed");
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    store.shutdown().await;
    info!("State flushed, bye");
    result
}
