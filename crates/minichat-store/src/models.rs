//! Records held in the state graph and persisted in the snapshot document.
//!
//! Records use camelCase field names so documents written by older,
//! unversioned deployments load without renaming anything below the top
//! level. Unknown fields are ignored on load.

use std::collections::BTreeMap;

use minichat_shared::types::{
    CallId, ChannelMessage, ChatMessage, ConversationId, SessionToken, Timestamp, UserId,
    UserProfile,
};
use serde::{Deserialize, Serialize};

use crate::migrations::CURRENT_VERSION;

fn first_level() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account. Bots are not stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    /// Lowercase `[a-z0-9_]`, unique across users and bots.
    pub username: String,
    pub name: String,
    /// Argon2 PHC string.
    #[serde(default)]
    pub password_hash: String,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub bio: String,
    /// Written only by the connection registry.
    #[serde(default)]
    pub online: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub premium: bool,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub banned: bool,
    #[serde(default = "first_level")]
    pub level: u32,
    #[serde(default)]
    pub xp: u32,
    #[serde(default)]
    pub balance: i64,
    /// Channels the user joined.
    #[serde(default)]
    pub channels: Vec<ConversationId>,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl User {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            username: self.username.clone(),
            name: self.name.clone(),
            avatar: self.avatar.clone(),
            bio: self.bio.clone(),
            online: self.online,
            verified: self.verified,
            premium: self.premium,
            is_bot: self.is_bot,
            level: self.level,
            balance: self.balance,
            created_at: self.created_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: UserId,
    #[serde(default)]
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// Two-party conversation. Participants never change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateChat {
    pub id: ConversationId,
    pub participants: [UserId; 2],
    #[serde(default)]
    pub unread: BTreeMap<UserId, u32>,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl PrivateChat {
    pub fn has_participant(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    /// The participant that is not `user`.
    pub fn other(&self, user: &UserId) -> Option<&UserId> {
        self.participants.iter().find(|p| *p != user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: ConversationId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub owner_id: UserId,
    /// Join order.
    #[serde(default)]
    pub members: Vec<UserId>,
    #[serde(default)]
    pub admins: Vec<UserId>,
    #[serde(default)]
    pub unread: BTreeMap<UserId, u32>,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl Group {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    /// The owner is always an admin.
    pub fn is_admin(&self, user: &UserId) -> bool {
        self.owner_id == *user || self.admins.contains(user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelSettings {
    pub allow_comments: bool,
    pub allow_reactions: bool,
    pub paid_reactions: bool,
    /// Clamped to `MIN_REACTION_PRICE..=MAX_REACTION_PRICE`.
    pub reaction_price: i64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            allow_comments: true,
            allow_reactions: true,
            paid_reactions: false,
            reaction_price: minichat_shared::constants::MIN_REACTION_PRICE,
        }
    }
}

/// Broadcast conversation with a post feed and a discussion chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: ConversationId,
    pub name: String,
    /// Optional public handle, unique across channels.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub avatar: Option<String>,
    pub owner_id: UserId,
    #[serde(default)]
    pub members: Vec<UserId>,
    #[serde(default)]
    pub admins: Vec<UserId>,
    #[serde(default)]
    pub posts: Vec<ChannelMessage>,
    #[serde(default)]
    pub chat: Vec<ChannelMessage>,
    #[serde(default)]
    pub settings: ChannelSettings,
    #[serde(default)]
    pub created_at: Timestamp,
}

impl Channel {
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }

    pub fn is_admin(&self, user: &UserId) -> bool {
        self.owner_id == *user || self.admins.contains(user)
    }
}

// ---------------------------------------------------------------------------
// Group calls
// ---------------------------------------------------------------------------

/// Persisted roster of a group call, keyed by group id in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupCall {
    pub id: CallId,
    pub group_id: ConversationId,
    pub participants: Vec<UserId>,
    #[serde(default)]
    pub started_at: Timestamp,
}

// ---------------------------------------------------------------------------
// State graph
// ---------------------------------------------------------------------------

/// The whole persisted document. Everything the server knows lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateGraph {
    pub schema_version: u32,
    #[serde(default)]
    pub users: BTreeMap<UserId, User>,
    #[serde(default)]
    pub sessions: BTreeMap<SessionToken, Session>,
    #[serde(default)]
    pub chats: BTreeMap<ConversationId, PrivateChat>,
    #[serde(default)]
    pub groups: BTreeMap<ConversationId, Group>,
    #[serde(default)]
    pub channels: BTreeMap<ConversationId, Channel>,
    /// Message sequences of private chats and groups, in insertion order.
    #[serde(default)]
    pub messages: BTreeMap<ConversationId, Vec<ChatMessage>>,
    #[serde(default)]
    pub group_calls: BTreeMap<ConversationId, GroupCall>,
}

impl Default for StateGraph {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_VERSION,
            users: BTreeMap::new(),
            sessions: BTreeMap::new(),
            chats: BTreeMap::new(),
            groups: BTreeMap::new(),
            channels: BTreeMap::new(),
            messages: BTreeMap::new(),
            group_calls: BTreeMap::new(),
        }
    }
}
