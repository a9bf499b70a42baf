//! Private chats and conversation lookup.

use minichat_shared::types::{ChatMessage, ConversationId, Timestamp, UserId, UserProfile};
use minichat_shared::{MinichatError, Result};
use serde::Serialize;

use crate::models::{PrivateChat, StateGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Private,
    Group,
}

/// Recipients of a private chat or group message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Members {
    pub kind: ConversationKind,
    pub members: Vec<UserId>,
}

impl Members {
    pub fn contains(&self, user: &UserId) -> bool {
        self.members.contains(user)
    }
}

/// The "other side" shown in a chat list entry.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ChatPeer {
    User(UserProfile),
    #[serde(rename_all = "camelCase")]
    Group {
        id: ConversationId,
        name: String,
        avatar: Option<String>,
        member_count: usize,
    },
}

/// One row of a user's chat list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ConversationId,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub is_group: bool,
    pub other: ChatPeer,
    pub last_message: Option<ChatMessage>,
    pub unread: u32,
}

impl ChatSummary {
    fn last_at(&self) -> Timestamp {
        self.last_message.as_ref().map_or(0, |m| m.created_at)
    }
}

fn deleted_profile(id: &UserId) -> UserProfile {
    UserProfile {
        id: id.clone(),
        username: String::new(),
        name: "Deleted account".into(),
        avatar: None,
        bio: String::new(),
        online: false,
        verified: false,
        premium: false,
        is_bot: false,
        level: 1,
        balance: 0,
        created_at: 0,
    }
}

impl StateGraph {
    pub fn private_chat(&self, id: &ConversationId) -> Option<&PrivateChat> {
        self.chats.get(id)
    }

    pub fn find_private_chat(&self, a: &UserId, b: &UserId) -> Option<&PrivateChat> {
        self.chats
            .values()
            .find(|c| c.has_participant(a) && c.has_participant(b))
    }

    /// Existing chat between `a` and `b`, or a new one. The flag is `true`
    /// when the chat was created by this call.
    pub fn open_private_chat(&mut self, a: &UserId, b: &UserId, now: Timestamp) -> (PrivateChat, bool) {
        if let Some(chat) = self.find_private_chat(a, b) {
            return (chat.clone(), false);
        }

        let chat = PrivateChat {
            id: ConversationId::new(),
            participants: [a.clone(), b.clone()],
            unread: Default::default(),
            created_at: now,
        };
        self.chats.insert(chat.id.clone(), chat.clone());
        self.messages.insert(chat.id.clone(), Vec::new());
        (chat, true)
    }

    /// Remove a private chat and its messages. Only participants may do it.
    pub fn delete_private_chat(&mut self, id: &ConversationId, by: &UserId) -> Result<PrivateChat> {
        match self.chats.get(id) {
            Some(chat) if chat.has_participant(by) => {}
            _ => return Err(MinichatError::not_found("Chat")),
        }
        self.messages.remove(id);
        self.chats.remove(id).ok_or_else(|| MinichatError::not_found("Chat"))
    }

    /// Resolve a message target: groups first, then private chats.
    pub fn conversation_members(&self, id: &ConversationId) -> Option<Members> {
        if let Some(group) = self.groups.get(id) {
            return Some(Members {
                kind: ConversationKind::Group,
                members: group.members.clone(),
            });
        }
        self.chats.get(id).map(|chat| Members {
            kind: ConversationKind::Private,
            members: chat.participants.to_vec(),
        })
    }

    /// Private chats and groups of `user`, newest activity first.
    pub fn chat_list(&self, user: &UserId) -> Vec<ChatSummary> {
        let last = |id: &ConversationId| self.messages.get(id).and_then(|m| m.last()).cloned();

        let private = self
            .chats
            .values()
            .filter(|c| c.has_participant(user))
            .map(|c| {
                let other_id = c.other(user).unwrap_or(user);
                ChatSummary {
                    id: c.id.clone(),
                    kind: ConversationKind::Private,
                    is_group: false,
                    other: ChatPeer::User(
                        self.profile(other_id)
                            .unwrap_or_else(|| deleted_profile(other_id)),
                    ),
                    last_message: last(&c.id),
                    unread: c.unread.get(user).copied().unwrap_or(0),
                }
            });

        let groups = self
            .groups
            .values()
            .filter(|g| g.is_member(user))
            .map(|g| ChatSummary {
                id: g.id.clone(),
                kind: ConversationKind::Group,
                is_group: true,
                other: ChatPeer::Group {
                    id: g.id.clone(),
                    name: g.name.clone(),
                    avatar: g.avatar.clone(),
                    member_count: g.members.len(),
                },
                last_message: last(&g.id),
                unread: g.unread.get(user).copied().unwrap_or(0),
            });

        let mut list: Vec<ChatSummary> = private.chain(groups).collect();
        list.sort_by_key(|s| std::cmp::Reverse(s.last_at()));
        list
    }
}
