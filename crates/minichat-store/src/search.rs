//! Directory lookups: user, bot and channel search, handle availability.

use minichat_shared::bots::BOTS;
use minichat_shared::constants::SEARCH_LIMIT;
use minichat_shared::types::{ConversationId, UserProfile};
use serde::Serialize;

use crate::models::StateGraph;
use crate::users::normalize_handle;

/// A channel as listed in search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHit {
    pub id: ConversationId,
    pub name: String,
    pub username: Option<String>,
    pub avatar: Option<String>,
    pub member_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResults {
    pub users: Vec<UserProfile>,
    pub bots: Vec<UserProfile>,
    pub channels: Vec<ChannelHit>,
}

/// Outcome of a channel handle check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleCheck {
    pub available: bool,
    /// The handle after normalization.
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateGraph {
    /// Case-insensitive substring search over usernames and display names
    /// of users and bots, and over channel names and handles. At most
    /// `SEARCH_LIMIT` hits per category. An empty query matches everything.
    pub fn search(&self, query: &str) -> SearchResults {
        let q = query.trim().to_lowercase();
        let hit = |username: &str, name: &str| username.contains(&q) || name.to_lowercase().contains(&q);

        let users = self
            .users
            .values()
            .filter(|u| !u.banned && hit(&u.username, &u.name))
            .take(SEARCH_LIMIT)
            .map(|u| u.profile())
            .collect();

        let bots = BOTS
            .iter()
            .filter(|b| hit(b.id, b.name))
            .take(SEARCH_LIMIT)
            .map(|b| b.profile())
            .collect();

        let channels = self
            .channels
            .values()
            .filter(|c| hit(c.username.as_deref().unwrap_or(""), &c.name))
            .take(SEARCH_LIMIT)
            .map(|c| ChannelHit {
                id: c.id.clone(),
                name: c.name.clone(),
                username: c.username.clone(),
                avatar: c.avatar.clone(),
                member_count: c.members.len(),
            })
            .collect();

        SearchResults { users, bots, channels }
    }

    /// Whether `raw` would be accepted as a new channel handle.
    pub fn check_channel_handle(&self, raw: &str) -> HandleCheck {
        match self.free_channel_handle(raw, None) {
            Ok(username) => HandleCheck {
                available: true,
                username,
                error: None,
            },
            Err(e) => HandleCheck {
                available: false,
                username: normalize_handle(raw),
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::NewChannel;
    use crate::users::NewUser;
    use minichat_shared::types::UserId;

    fn user(state: &mut StateGraph, username: &str, name: &str) -> UserId {
        state
            .create_user(
                NewUser {
                    username: username.into(),
                    name: name.into(),
                    password_hash: String::new(),
                },
                0,
            )
            .unwrap()
            .id
    }

    #[test]
    fn search_matches_handles_and_names_across_kinds() {
        let mut state = StateGraph::default();
        let anna = user(&mut state, "anna", "Anna Musician");
        user(&mut state, "boris", "Boris");
        state
            .create_channel(
                &anna,
                NewChannel { name: "Music News".into(), username: Some("tunes".into()), ..Default::default() },
                0,
            )
            .unwrap();

        let found = state.search("  MUSIC ");
        assert_eq!(found.users.iter().map(|u| u.username.as_str()).collect::<Vec<_>>(), ["anna"]);
        assert_eq!(found.bots.iter().map(|b| b.username.as_str()).collect::<Vec<_>>(), ["musicbot"]);
        assert_eq!(found.channels.len(), 1);
        assert_eq!(found.channels[0].member_count, 1);

        assert_eq!(state.search("tunes").channels.len(), 1);
        assert_eq!(state.search("zzz"), SearchResults::default());
    }

    #[test]
    fn search_is_capped_per_category() {
        let mut state = StateGraph::default();
        for i in 0..15 {
            user(&mut state, &format!("fan{i:02}"), "Fan");
        }
        assert_eq!(state.search("fan").users.len(), SEARCH_LIMIT);
    }

    #[test]
    fn handle_check_normalizes_and_reports_conflicts() {
        let mut state = StateGraph::default();
        let owner = user(&mut state, "owner", "Owner");
        state
            .create_channel(
                &owner,
                NewChannel { name: "Daily".into(), username: Some("daily".into()), ..Default::default() },
                0,
            )
            .unwrap();

        let free = state.check_channel_handle("Weekly!");
        assert!(free.available);
        assert_eq!(free.username, "weekly");

        let taken = state.check_channel_handle("DAILY");
        assert!(!taken.available);
        assert_eq!(taken.error.as_deref(), Some("Username is taken"));

        let short = state.check_channel_handle("ab");
        assert!(!short.available);
        assert!(short.error.unwrap().contains("at least"));
    }
}
