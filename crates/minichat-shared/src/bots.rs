//! Static catalog of system bots.
//!
//! Bots are not stored in the state graph. Their id equals their username,
//! they are always online and verified, and they may appear as a participant
//! of a private chat.

use crate::types::{UserId, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub avatar: &'static str,
}

pub const SAVED: &str = "saved";
pub const AI_BOT: &str = "aibot";
pub const GAME_BOT: &str = "gamebot";
pub const MUSIC_BOT: &str = "musicbot";
pub const PREMIUM_BOT: &str = "premiumbot";
pub const WEATHER_BOT: &str = "weatherbot";
pub const QUOTE_BOT: &str = "quotebot";

pub const BOTS: &[BotInfo] = &[
    BotInfo { id: SAVED, name: "Saved Messages", avatar: "⭐" },
    BotInfo { id: AI_BOT, name: "AI Assistant", avatar: "🤖" },
    BotInfo { id: GAME_BOT, name: "Game Bot", avatar: "🎮" },
    BotInfo { id: MUSIC_BOT, name: "Music Bot", avatar: "🎵" },
    BotInfo { id: PREMIUM_BOT, name: "Premium Bot", avatar: "⭐" },
    BotInfo { id: WEATHER_BOT, name: "Weather Bot", avatar: "🌤️" },
    BotInfo { id: QUOTE_BOT, name: "Quote Bot", avatar: "💬" },
];

pub fn find(id: &str) -> Option<&'static BotInfo> {
    BOTS.iter().find(|b| b.id == id)
}

pub fn is_bot(id: &UserId) -> bool {
    find(id.as_str()).is_some()
}

impl BotInfo {
    pub fn user_id(&self) -> UserId {
        UserId::from(self.id)
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.user_id(),
            username: self.id.to_string(),
            name: self.name.to_string(),
            avatar: Some(self.avatar.to_string()),
            bio: String::new(),
            online: true,
            verified: true,
            premium: false,
            is_bot: true,
            level: 1,
            balance: 0,
            created_at: 0,
        }
    }
}
