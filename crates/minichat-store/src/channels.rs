//! Channel records: settings, roles, posts, discussion chat and reactions.

use minichat_shared::constants::{
    DEFAULT_PAID_REACTION, MAX_CHANNEL_DESCRIPTION_LEN, MAX_CHANNEL_USERNAME_LEN, MAX_NAME_LEN,
    MAX_REACTION_PRICE, MIN_REACTION_PRICE, MIN_USERNAME_LEN,
};
use minichat_shared::types::{
    ChannelEndpoint, ChannelMessage, ConversationId, MessageId, PaidReaction, Timestamp, UserId,
};
use minichat_shared::{MinichatError, Result};
use serde::Deserialize;

use crate::clip;
use crate::models::{Channel, StateGraph};
use crate::users::normalize_handle;

#[derive(Debug, Clone, Default)]
pub struct NewChannel {
    pub name: String,
    pub username: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

/// Partial settings change as sent by clients.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    pub allow_comments: Option<bool>,
    pub allow_reactions: Option<bool>,
    pub paid_reactions: Option<bool>,
    pub reaction_price: Option<i64>,
}

/// Partial channel update. `username: Some(None)` clears the handle.
#[derive(Debug, Clone, Default)]
pub struct ChannelUpdate {
    pub name: Option<String>,
    pub username: Option<Option<String>>,
    pub description: Option<String>,
    pub avatar: Option<Option<String>>,
    pub settings: Option<SettingsPatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    Add,
    Remove,
}

/// Outcome of a paid reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaidReactionReceipt {
    /// Reactor's balance after paying.
    pub balance: i64,
    pub total_reactions: usize,
}

fn channel_not_found() -> MinichatError {
    MinichatError::not_found("Channel")
}

fn post_not_found() -> MinichatError {
    MinichatError::not_found("Post")
}

impl StateGraph {
    // ------------------------------------------------------------------
    // Create / read
    // ------------------------------------------------------------------

    /// Validated, normalized channel handle that no other channel uses.
    pub(crate) fn free_channel_handle(&self, raw: &str, except: Option<&ConversationId>) -> Result<String> {
        let handle = normalize_handle(raw);
        let len = handle.chars().count();
        if len < MIN_USERNAME_LEN {
            return Err(MinichatError::invalid(format!(
                "Username must be at least {MIN_USERNAME_LEN} characters"
            )));
        }
        if len > MAX_CHANNEL_USERNAME_LEN {
            return Err(MinichatError::invalid(format!(
                "Username must be at most {MAX_CHANNEL_USERNAME_LEN} characters"
            )));
        }
        let taken = self
            .channels
            .values()
            .any(|c| c.username.as_deref() == Some(handle.as_str()) && Some(&c.id) != except);
        if taken {
            return Err(MinichatError::invalid("Username is taken"));
        }
        Ok(handle)
    }

    pub fn create_channel(&mut self, owner: &UserId, new: NewChannel, now: Timestamp) -> Result<Channel> {
        let name = clip(new.name.trim(), MAX_NAME_LEN);
        if name.is_empty() {
            return Err(MinichatError::invalid("Channel name is required"));
        }
        let username = match new.username.as_deref().filter(|u| !u.is_empty()) {
            Some(raw) => Some(self.free_channel_handle(raw, None)?),
            None => None,
        };

        let channel = Channel {
            id: ConversationId::new(),
            name,
            username,
            description: clip(new.description.as_deref().unwrap_or(""), MAX_CHANNEL_DESCRIPTION_LEN),
            avatar: new.avatar,
            owner_id: owner.clone(),
            members: vec![owner.clone()],
            admins: vec![owner.clone()],
            posts: Vec::new(),
            chat: Vec::new(),
            settings: Default::default(),
            created_at: now,
        };
        self.channels.insert(channel.id.clone(), channel.clone());
        if let Some(user) = self.users.get_mut(owner) {
            user.channels.push(channel.id.clone());
        }
        Ok(channel)
    }

    pub fn channel(&self, id: &ConversationId) -> Option<&Channel> {
        self.channels.get(id)
    }

    pub fn channel_by_username(&self, username: &str) -> Option<&Channel> {
        let handle = normalize_handle(username);
        self.channels
            .values()
            .find(|c| c.username.as_deref() == Some(handle.as_str()))
    }

    pub fn channels_for(&self, user: &UserId) -> Vec<&Channel> {
        self.channels.values().filter(|c| c.is_member(user)).collect()
    }

    fn channel_mut(&mut self, id: &ConversationId) -> Result<&mut Channel> {
        self.channels.get_mut(id).ok_or_else(channel_not_found)
    }

    // ------------------------------------------------------------------
    // Settings and roles
    // ------------------------------------------------------------------

    /// Apply an update. Owner or admin; changing the handle is owner only
    /// and an invalid or taken handle is ignored.
    pub fn update_channel(&mut self, id: &ConversationId, by: &UserId, update: ChannelUpdate) -> Result<Channel> {
        let channel = self.channels.get(id).ok_or_else(channel_not_found)?;
        if !channel.is_admin(by) {
            return Err(MinichatError::forbidden("Not allowed"));
        }
        let is_owner = channel.owner_id == *by;

        let username = match update.username {
            Some(None) if is_owner => Some(None),
            Some(Some(raw)) if is_owner && raw.is_empty() => Some(None),
            Some(Some(raw)) if is_owner => self.free_channel_handle(&raw, Some(id)).ok().map(Some),
            _ => None,
        };

        let channel = self.channel_mut(id)?;
        if let Some(name) = update.name.map(|n| clip(n.trim(), MAX_NAME_LEN)) {
            if !name.is_empty() {
                channel.name = name;
            }
        }
        if let Some(username) = username {
            channel.username = username;
        }
        if let Some(description) = update.description {
            channel.description = clip(&description, MAX_CHANNEL_DESCRIPTION_LEN);
        }
        if let Some(avatar) = update.avatar {
            channel.avatar = avatar;
        }
        if let Some(patch) = update.settings {
            let s = &mut channel.settings;
            s.allow_comments = patch.allow_comments.unwrap_or(s.allow_comments);
            s.allow_reactions = patch.allow_reactions.unwrap_or(s.allow_reactions);
            s.paid_reactions = patch.paid_reactions.unwrap_or(s.paid_reactions);
            if let Some(price) = patch.reaction_price {
                s.reaction_price = price.clamp(MIN_REACTION_PRICE, MAX_REACTION_PRICE);
            }
        }
        Ok(channel.clone())
    }

    /// Owner adds or removes an admin. Returns the admin list.
    pub fn set_channel_admin(
        &mut self,
        id: &ConversationId,
        by: &UserId,
        target: &UserId,
        action: AdminAction,
    ) -> Result<Vec<UserId>> {
        let target_exists = self.users.contains_key(target);
        let channel = self.channel_mut(id)?;
        if channel.owner_id != *by {
            return Err(MinichatError::forbidden("Only the owner can appoint admins"));
        }
        if !target_exists {
            return Err(MinichatError::not_found("User"));
        }
        if !channel.is_member(target) {
            return Err(MinichatError::invalid("User is not subscribed to the channel"));
        }
        match action {
            AdminAction::Add if !channel.admins.contains(target) => channel.admins.push(target.clone()),
            AdminAction::Add => {}
            AdminAction::Remove => channel.admins.retain(|a| a != target || *a == channel.owner_id),
        }
        Ok(channel.admins.clone())
    }

    /// Remove a member. Owner or admin; only the owner may kick an admin.
    pub fn kick_channel_member(&mut self, id: &ConversationId, by: &UserId, target: &UserId) -> Result<()> {
        let channel = self.channel_mut(id)?;
        if !channel.is_admin(by) {
            return Err(MinichatError::forbidden("Not allowed"));
        }
        if channel.owner_id == *target {
            return Err(MinichatError::invalid("The owner cannot be kicked"));
        }
        if channel.admins.contains(target) && channel.owner_id != *by {
            return Err(MinichatError::invalid("Only the owner can kick an admin"));
        }
        channel.members.retain(|m| m != target);
        channel.admins.retain(|m| m != target);

        if let Some(user) = self.users.get_mut(target) {
            user.channels.retain(|c| c != id);
        }
        Ok(())
    }

    pub fn join_channel(&mut self, id: &ConversationId, user: &UserId) -> Result<Channel> {
        let channel = self.channel_mut(id)?;
        if !channel.is_member(user) {
            channel.members.push(user.clone());
        }
        let channel = channel.clone();

        if let Some(u) = self.users.get_mut(user) {
            if !u.channels.contains(id) {
                u.channels.push(id.clone());
            }
        }
        Ok(channel)
    }

    pub fn leave_channel(&mut self, id: &ConversationId, user: &UserId) -> Result<()> {
        let channel = self.channel_mut(id)?;
        if channel.owner_id == *user {
            return Err(MinichatError::invalid("The owner cannot leave the channel"));
        }
        channel.members.retain(|m| m != user);
        channel.admins.retain(|m| m != user);

        if let Some(u) = self.users.get_mut(user) {
            u.channels.retain(|c| c != id);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Posts and chat
    // ------------------------------------------------------------------

    /// Append to the post feed (owner/admin) or the discussion chat
    /// (members; admins only when comments are disabled).
    pub fn append_channel_message(
        &mut self,
        id: &ConversationId,
        from: &UserId,
        endpoint: ChannelEndpoint,
        text: Option<String>,
        image: Option<String>,
        now: Timestamp,
    ) -> Result<ChannelMessage> {
        let channel = self.channel_mut(id)?;
        if !channel.is_member(from) {
            return Err(channel_not_found());
        }
        let empty = |s: &Option<String>| s.as_deref().map_or(true, str::is_empty);
        if empty(&text) && empty(&image) {
            return Err(MinichatError::invalid("Message is empty"));
        }

        let seq = match endpoint {
            ChannelEndpoint::Post if !channel.is_admin(from) => {
                return Err(MinichatError::forbidden("No permission to publish"));
            }
            ChannelEndpoint::Chat if !channel.settings.allow_comments && !channel.is_admin(from) => {
                return Err(MinichatError::forbidden("Comments are disabled"));
            }
            ChannelEndpoint::Post => &mut channel.posts,
            ChannelEndpoint::Chat => &mut channel.chat,
        };

        let created_at = seq.last().map_or(now, |last| now.max(last.created_at));
        let message = ChannelMessage {
            id: MessageId::new(),
            from: from.clone(),
            text,
            image,
            likes: Default::default(),
            paid_reactions: Default::default(),
            created_at,
        };
        seq.push(message.clone());
        Ok(message)
    }

    /// Toggle `user`'s like. Returns `(like_count, liked)`.
    pub fn toggle_like(&mut self, id: &ConversationId, post: &MessageId, user: &UserId) -> Result<(usize, bool)> {
        let channel = self.channel_mut(id)?;
        if !channel.settings.allow_reactions {
            return Err(MinichatError::forbidden("Reactions are disabled"));
        }
        let post = channel
            .posts
            .iter_mut()
            .find(|p| p.id == *post)
            .ok_or_else(post_not_found)?;

        let liked = if post.likes.remove(user) {
            false
        } else {
            post.likes.insert(user.clone());
            true
        };
        Ok((post.likes.len(), liked))
    }

    /// Pay the channel's reaction price from `user` to the channel owner and
    /// record the reaction.
    pub fn add_paid_reaction(
        &mut self,
        id: &ConversationId,
        post: &MessageId,
        user: &UserId,
        emoji: Option<String>,
        now: Timestamp,
    ) -> Result<PaidReactionReceipt> {
        let channel = self.channels.get(id).ok_or_else(channel_not_found)?;
        if !channel.posts.iter().any(|p| p.id == *post) {
            return Err(post_not_found());
        }
        let price = channel.settings.reaction_price;
        let owner = channel.owner_id.clone();

        let reactor = self.users.get_mut(user).ok_or_else(MinichatError::unauthorized)?;
        if reactor.balance < price {
            return Err(MinichatError::invalid(format!("You need {price} ⭐")));
        }
        reactor.balance -= price;
        let balance_after_debit = reactor.balance;
        if let Some(owner) = self.users.get_mut(&owner) {
            owner.balance += price;
        }
        let balance = self.users.get(user).map_or(balance_after_debit, |u| u.balance);

        let emoji = emoji
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| DEFAULT_PAID_REACTION.to_string());
        let post = self
            .channel_mut(id)?
            .posts
            .iter_mut()
            .find(|p| p.id == *post)
            .ok_or_else(post_not_found)?;
        post.paid_reactions.entry(emoji).or_default().push(PaidReaction {
            user_id: user.clone(),
            amount: price,
            created_at: now,
        });

        Ok(PaidReactionReceipt {
            balance,
            total_reactions: post.total_paid_reactions(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::NewUser;

    fn user(state: &mut StateGraph, name: &str) -> UserId {
        state
            .create_user(
                NewUser {
                    username: name.into(),
                    name: name.into(),
                    password_hash: String::new(),
                },
                0,
            )
            .unwrap()
            .id
    }

    fn setup() -> (StateGraph, ConversationId, UserId, UserId) {
        let mut state = StateGraph::default();
        let owner = user(&mut state, "owner");
        let member = user(&mut state, "member");
        let channel = state
            .create_channel(
                &owner,
                NewChannel { name: "News".into(), username: Some("The_News".into()), ..Default::default() },
                0,
            )
            .unwrap();
        state.join_channel(&channel.id, &member).unwrap();
        (state, channel.id, owner, member)
    }

    #[test]
    fn handles_are_normalized_and_unique() {
        let (mut state, id, owner, _) = setup();
        assert_eq!(state.channel(&id).unwrap().username.as_deref(), Some("the_news"));
        assert!(state.channel_by_username("THE_NEWS").is_some());

        let dup = NewChannel { name: "Copy".into(), username: Some("the_news".into()), ..Default::default() };
        assert!(state.create_channel(&owner, dup, 1).is_err());
        assert!(state.user(&owner).unwrap().channels.contains(&id));
    }

    #[test]
    fn only_admins_post_members_chat() {
        let (mut state, id, owner, member) = setup();
        let text = || Some("hello".to_string());

        assert!(matches!(
            state.append_channel_message(&id, &member, ChannelEndpoint::Post, text(), None, 1),
            Err(MinichatError::Permission(_))
        ));
        state.append_channel_message(&id, &owner, ChannelEndpoint::Post, text(), None, 1).unwrap();
        state.append_channel_message(&id, &member, ChannelEndpoint::Chat, text(), None, 2).unwrap();

        let outsider = UserId::from("outsider");
        assert!(state.append_channel_message(&id, &outsider, ChannelEndpoint::Chat, text(), None, 3).is_err());

        let channel = state.channel(&id).unwrap();
        assert_eq!(channel.posts.len(), 1);
        assert_eq!(channel.chat.len(), 1);
    }

    #[test]
    fn settings_clamp_price_and_restrict_handle_to_owner() {
        let (mut state, id, owner, member) = setup();
        state.set_channel_admin(&id, &owner, &member, AdminAction::Add).unwrap();

        let update = ChannelUpdate {
            username: Some(Some("renamed".into())),
            settings: Some(SettingsPatch { reaction_price: Some(500), ..Default::default() }),
            ..Default::default()
        };
        let channel = state.update_channel(&id, &member, update).unwrap();
        assert_eq!(channel.settings.reaction_price, MAX_REACTION_PRICE);
        assert_eq!(channel.username.as_deref(), Some("the_news"));

        let clear = ChannelUpdate { username: Some(None), ..Default::default() };
        assert!(state.update_channel(&id, &owner, clear).unwrap().username.is_none());
    }

    #[test]
    fn only_owner_kicks_admins() {
        let (mut state, id, owner, member) = setup();
        let third = user(&mut state, "third");
        state.join_channel(&id, &third).unwrap();
        state.set_channel_admin(&id, &owner, &member, AdminAction::Add).unwrap();
        state.set_channel_admin(&id, &owner, &third, AdminAction::Add).unwrap();

        assert!(state.kick_channel_member(&id, &member, &third).is_err());
        assert!(state.kick_channel_member(&id, &member, &owner).is_err());
        state.kick_channel_member(&id, &owner, &third).unwrap();
        assert!(!state.channel(&id).unwrap().is_member(&third));
        assert!(state.user(&third).unwrap().channels.is_empty());
    }

    #[test]
    fn likes_toggle() {
        let (mut state, id, owner, member) = setup();
        let post = state
            .append_channel_message(&id, &owner, ChannelEndpoint::Post, Some("p".into()), None, 1)
            .unwrap();
        assert_eq!(state.toggle_like(&id, &post.id, &member).unwrap(), (1, true));
        assert_eq!(state.toggle_like(&id, &post.id, &member).unwrap(), (0, false));
    }

    #[test]
    fn paid_reaction_moves_balance_to_owner() {
        let (mut state, id, owner, member) = setup();
        let update = ChannelUpdate {
            settings: Some(SettingsPatch { reaction_price: Some(5), ..Default::default() }),
            ..Default::default()
        };
        state.update_channel(&id, &owner, update).unwrap();
        let post = state
            .append_channel_message(&id, &owner, ChannelEndpoint::Post, Some("p".into()), None, 1)
            .unwrap();

        let member_before = state.user(&member).unwrap().balance;
        let owner_before = state.user(&owner).unwrap().balance;
        let receipt = state.add_paid_reaction(&id, &post.id, &member, None, 2).unwrap();

        assert_eq!(receipt.balance, member_before - 5);
        assert_eq!(receipt.total_reactions, 1);
        assert_eq!(state.user(&owner).unwrap().balance, owner_before + 5);
        let post = &state.channel(&id).unwrap().posts[0];
        assert_eq!(post.paid_reactions[DEFAULT_PAID_REACTION][0].amount, 5);
    }

    #[test]
    fn paid_reaction_requires_balance() {
        let (mut state, id, owner, member) = setup();
        let post = state
            .append_channel_message(&id, &owner, ChannelEndpoint::Post, Some("p".into()), None, 1)
            .unwrap();
        state.user_mut(&member).unwrap().balance = 0;
        assert!(matches!(
            state.add_paid_reaction(&id, &post.id, &member, Some("🔥".into()), 2),
            Err(MinichatError::Validation(_))
        ));
        assert_eq!(state.user(&owner).unwrap().balance, 50);
    }
}
