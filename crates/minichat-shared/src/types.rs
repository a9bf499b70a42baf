use std::collections::{BTreeMap, BTreeSet};

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::ID_BYTES;

/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;

pub fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

/// Generate a fresh identifier: `ID_BYTES` random bytes, hex-encoded.
///
/// Users, conversations, messages, calls and session tokens all draw from
/// this single namespace, so a group id can never collide with a chat id.
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new() -> Self {
                Self(generate_id())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// A user identity. System bots use their username as id.
    UserId
);
string_id!(
    /// Identity of a private chat, group or channel.
    ConversationId
);
string_id!(MessageId);
string_id!(CallId);
string_id!(
    /// Opaque bearer token bound to a user identity.
    SessionToken
);

/// Lifecycle of a 1:1 call. `Ended` is never stored: an ended call is
/// removed from the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Ringing,
    Connected,
}

/// Which sequence of a channel a `channel_message` frame targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelEndpoint {
    /// Broadcast post, owner/admin only.
    Post,
    /// Discussion chat, any member.
    #[default]
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelRole {
    Owner,
    Admin,
    Member,
}

/// Public view of a user (or bot). Never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub name: String,
    pub avatar: Option<String>,
    pub bio: String,
    pub online: bool,
    pub verified: bool,
    pub premium: bool,
    pub is_bot: bool,
    pub level: u32,
    pub balance: i64,
    pub created_at: Timestamp,
}

/// Optional payload parts of a chat message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Reply reference, kept as the client sent it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<serde_json::Value>,
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        let blank = |s: &Option<String>| s.as_deref().map_or(true, str::is_empty);
        blank(&self.text) && blank(&self.image) && blank(&self.voice)
    }
}

/// A message in a private chat or group. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub from: UserId,
    #[serde(flatten)]
    pub content: MessageContent,
    pub created_at: Timestamp,
    /// Set on copies forwarded into the `saved` chat.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_from: Option<ConversationId>,
}

/// One paid reaction on a channel post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaidReaction {
    pub user_id: UserId,
    pub amount: i64,
    pub created_at: Timestamp,
}

/// A channel post or channel chat entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMessage {
    pub id: MessageId,
    pub from: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub likes: BTreeSet<UserId>,
    #[serde(default)]
    pub paid_reactions: BTreeMap<String, Vec<PaidReaction>>,
    pub created_at: Timestamp,
}

impl ChannelMessage {
    pub fn total_paid_reactions(&self) -> usize {
        self.paid_reactions.values().map(Vec::len).sum()
    }
}
