//! # minichat-store
//!
//! Authoritative in-memory state of the Minichat server and its durable
//! JSON snapshot.
//!
//! [`Store`] wraps the [`StateGraph`] in a single async mutex, so every
//! mutation is serialized. Typed helpers on `StateGraph` (users, chats,
//! groups, channels, messages, group-call rosters) enforce membership and
//! role rules and return [`minichat_shared::MinichatError`] on violation.
//! When a change becomes durable is the caller's choice between
//! [`Store::save_now`] and [`Store::schedule_save`].

pub mod channels;
pub mod chats;
pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod search;
pub mod snapshot;
pub mod users;

mod error;

pub use chats::{ChatPeer, ChatSummary, ConversationKind, Members};
pub use database::{Store, StoreOptions};
pub use error::StoreError;
pub use groups::Roster;
pub use messages::Appended;
pub use models::*;
pub use search::{ChannelHit, HandleCheck, SearchResults};
pub use users::LevelUp;

/// First `max` characters of `s`.
pub(crate) fn clip(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
