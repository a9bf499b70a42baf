//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use minichat_shared::constants::{
    APP_NAME, DEFAULT_HTTP_PORT, FLUSH_INTERVAL_SECS, SAVE_DEBOUNCE_MS,
};
use minichat_store::StoreOptions;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for HTTP and the `/ws` upgrade.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Path of the JSON state document.
    /// Env: `DB_FILE`
    /// Default: `./database.json`
    pub db_file: PathBuf,

    /// Quiet period before a debounced save hits the disk.
    /// Env: `SAVE_DEBOUNCE_MS`
    pub save_debounce: Duration,

    /// Unconditional flush period.
    /// Env: `FLUSH_INTERVAL_SECS`
    pub flush_interval: Duration,

    /// Session lifetime. `None` keeps sessions forever.
    /// Env: `SESSION_TTL_SECS`
    pub session_ttl: Option<Duration>,

    /// Close the previous socket when a user connects again.
    /// Env: `CLOSE_SUPERSEDED` (true/false)
    /// Default: `true`
    pub close_superseded: bool,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    pub instance_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            db_file: PathBuf::from("./database.json"),
            save_debounce: Duration::from_millis(SAVE_DEBOUNCE_MS),
            flush_interval: Duration::from_secs(FLUSH_INTERVAL_SECS),
            session_ttl: None,
            close_superseded: true,
            instance_name: APP_NAME.to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = get("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = get("DB_FILE").filter(|p| !p.is_empty()) {
            config.db_file = PathBuf::from(path);
        }

        if let Some(ms) = parse_u64(&get, "SAVE_DEBOUNCE_MS") {
            config.save_debounce = Duration::from_millis(ms);
        }

        if let Some(secs) = parse_u64(&get, "FLUSH_INTERVAL_SECS").filter(|s| *s > 0) {
            config.flush_interval = Duration::from_secs(secs);
        }

        if let Some(secs) = parse_u64(&get, "SESSION_TTL_SECS") {
            config.session_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(val) = get("CLOSE_SUPERSEDED") {
            config.close_superseded = val != "false" && val != "0";
        }

        if let Some(name) = get("INSTANCE_NAME") {
            config.instance_name = name;
        }

        config
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            debounce: self.save_debounce,
            flush_interval: self.flush_interval,
        }
    }

    /// Session TTL in milliseconds, as stored timestamps are.
    pub fn session_ttl_ms(&self) -> Option<i64> {
        self.session_ttl
            .map(|ttl| i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
    }
}

fn parse_u64(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<u64> {
    let raw = get(key)?;
    match raw.trim().parse::<u64>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid number, using default");
            None
        }
    }
}
