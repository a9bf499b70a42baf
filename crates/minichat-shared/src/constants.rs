/// Application name
pub const APP_NAME: &str = "Minichat";

/// Default HTTP/WebSocket port
pub const DEFAULT_HTTP_PORT: u16 = 3000;

/// Random bytes per generated identifier (hex-encoded to 24 chars)
pub const ID_BYTES: usize = 12;

/// Debounce window for coalesced state writes, in milliseconds
pub const SAVE_DEBOUNCE_MS: u64 = 500;

/// Unconditional flush interval, in seconds
pub const FLUSH_INTERVAL_SECS: u64 = 30;

/// Bot reply delay is drawn uniformly from `[MIN, MAX)` milliseconds
pub const BOT_REPLY_MIN_DELAY_MS: u64 = 500;
pub const BOT_REPLY_MAX_DELAY_MS: u64 = 1500;

/// Experience needed to leave level `n` is `n * XP_PER_LEVEL`
pub const XP_PER_LEVEL: u32 = 100;

/// Balance granted on reaching level `n` is `n * LEVEL_BONUS_PER_LEVEL`
pub const LEVEL_BONUS_PER_LEVEL: i64 = 10;

/// Balance of a freshly registered user
pub const STARTING_BALANCE: i64 = 50;

/// Field limits
pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_CHANNEL_USERNAME_LEN: usize = 32;
pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_NAME_LEN: usize = 50;
pub const MAX_GROUP_DESCRIPTION_LEN: usize = 200;
pub const MAX_CHANNEL_DESCRIPTION_LEN: usize = 500;

/// Paid reaction price bounds (stars)
pub const MIN_REACTION_PRICE: i64 = 1;
pub const MAX_REACTION_PRICE: i64 = 100;

/// Emoji used for a paid reaction when the client sends none
pub const DEFAULT_PAID_REACTION: &str = "⭐";

/// Invite link scheme for channels
pub const CHANNEL_INVITE_SCHEME: &str = "minichat://channel/";

/// Maximum hits per category returned by a search
pub const SEARCH_LIMIT: usize = 10;
