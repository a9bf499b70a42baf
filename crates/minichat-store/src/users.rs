use minichat_shared::bots;
use minichat_shared::constants::{
    LEVEL_BONUS_PER_LEVEL, MAX_NAME_LEN, MIN_USERNAME_LEN, STARTING_BALANCE, XP_PER_LEVEL,
};
use minichat_shared::types::{SessionToken, Timestamp, UserId, UserProfile};
use minichat_shared::{MinichatError, Result};

use crate::clip;
use crate::models::{Session, StateGraph, User};

/// Lowercase `raw` and strip everything outside `[a-z0-9_]`.
pub fn normalize_handle(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

/// Fields of a registration request after password hashing.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub password_hash: String,
}

/// Reported to the sender when a private message crosses a level threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUp {
    pub level: u32,
    pub bonus: i64,
}

impl StateGraph {
    pub fn user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn user_mut(&mut self, id: &UserId) -> Option<&mut User> {
        self.users.get_mut(id)
    }

    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        let username = username.to_lowercase();
        self.users.values().find(|u| u.username == username)
    }

    /// Resolve a user id or username. Bots are not matched.
    pub fn find_user(&self, id_or_username: &str) -> Option<&User> {
        self.users
            .get(&UserId::from(id_or_username))
            .or_else(|| self.user_by_username(id_or_username))
    }

    /// Public view of a stored user or a system bot.
    pub fn profile(&self, id: &UserId) -> Option<UserProfile> {
        match self.users.get(id) {
            Some(user) => Some(user.profile()),
            None => bots::find(id.as_str()).map(|b| b.profile()),
        }
    }

    pub fn username_taken(&self, username: &str) -> bool {
        bots::find(username).is_some() || self.user_by_username(username).is_some()
    }

    pub fn create_user(&mut self, new: NewUser, now: Timestamp) -> Result<User> {
        let username = normalize_handle(&new.username);
        if username.chars().count() < MIN_USERNAME_LEN {
            return Err(MinichatError::invalid(format!(
                "Username must be at least {MIN_USERNAME_LEN} characters"
            )));
        }
        if self.username_taken(&username) {
            return Err(MinichatError::invalid("Username is taken"));
        }
        let name = clip(new.name.trim(), MAX_NAME_LEN);
        if name.is_empty() {
            return Err(MinichatError::invalid("Name is required"));
        }

        let user = User {
            id: UserId::new(),
            username,
            name,
            password_hash: new.password_hash,
            avatar: None,
            bio: String::new(),
            online: false,
            verified: false,
            premium: false,
            is_bot: false,
            banned: false,
            level: 1,
            xp: 0,
            balance: STARTING_BALANCE,
            channels: Vec::new(),
            created_at: now,
        };
        self.users.insert(user.id.clone(), user.clone());
        Ok(user)
    }

    pub fn create_session(&mut self, user_id: &UserId, now: Timestamp) -> SessionToken {
        let token = SessionToken::new();
        self.sessions.insert(
            token.clone(),
            Session {
                user_id: user_id.clone(),
                created_at: now,
            },
        );
        token
    }

    /// The user bound to `token`, if the session exists, has not outlived
    /// `ttl_ms` and the user still exists.
    pub fn resolve_session(&self, token: &str, ttl_ms: Option<i64>, now: Timestamp) -> Option<&User> {
        let session = self.sessions.get(&SessionToken::from(token))?;
        if let Some(ttl) = ttl_ms {
            if now.saturating_sub(session.created_at) > ttl {
                return None;
            }
        }
        self.users.get(&session.user_id)
    }

    /// Drop sessions older than `ttl_ms`. Returns how many were removed.
    pub fn purge_sessions(&mut self, ttl_ms: i64, now: Timestamp) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, s| now.saturating_sub(s.created_at) <= ttl_ms);
        before - self.sessions.len()
    }

    /// Set the presence flag. Returns `false` for unknown users.
    pub fn set_presence(&mut self, user_id: &UserId, online: bool) -> bool {
        match self.users.get_mut(user_id) {
            Some(user) => {
                user.online = online;
                true
            }
            None => false,
        }
    }

    /// Count one private message towards the sender's level.
    ///
    /// Reaching `level * XP_PER_LEVEL` experience raises the level, resets
    /// the counter and credits `new_level * LEVEL_BONUS_PER_LEVEL`.
    pub fn record_private_message(&mut self, user_id: &UserId) -> Option<LevelUp> {
        let user = self.users.get_mut(user_id)?;
        user.xp += 1;
        if user.xp < user.level.saturating_mul(XP_PER_LEVEL) {
            return None;
        }

        user.level += 1;
        user.xp = 0;
        let bonus = i64::from(user.level) * LEVEL_BONUS_PER_LEVEL;
        user.balance += bonus;
        Some(LevelUp {
            level: user.level,
            bonus,
        })
    }
}
