//! Message routing: append, persist, fan out.
//!
//! Private chat and group messages are delivered to every connected member,
//! the sender included. Private messages also feed the sender's level and
//! wake up the bot on the other side, if any. Bot replies are owned tasks
//! keyed by conversation and are aborted when the conversation goes away.

use std::collections::HashMap;
use std::sync::Arc;

use minichat_shared::bots::is_bot;
use minichat_shared::protocol::{ChannelMessageView, MessageView, ServerEvent};
use minichat_shared::types::{
    now_millis, ChannelEndpoint, ChannelMessage, ConversationId, MessageContent, UserId,
};
use minichat_shared::{MinichatError, Result};
use minichat_store::{ConversationKind, LevelUp, PrivateChat, Store};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bots;
use crate::registry::ConnectionRegistry;

/// How a mutation reaches the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Written before the call returns.
    Sync,
    /// Coalesced by the store's debounce window.
    Debounced,
}

/// Everything needed to deliver a freshly appended chat message.
struct Delivery {
    members: Vec<UserId>,
    is_group: bool,
    view: MessageView,
    first: bool,
    level_up: Option<LevelUp>,
    bot: Option<UserId>,
}

#[derive(Clone)]
pub struct MessageRouter {
    store: Store,
    registry: ConnectionRegistry,
    bot_tasks: Arc<Mutex<HashMap<ConversationId, Vec<JoinHandle<()>>>>>,
}

impl MessageRouter {
    pub fn new(store: Store, registry: ConnectionRegistry) -> Self {
        Self {
            store,
            registry,
            bot_tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Route a `send_message` frame.
    ///
    /// Empty messages are rejected. A sender that is not a participant of
    /// `chat_id` (or an unknown `chat_id`) is dropped without an error.
    pub async fn send_message(
        &self,
        sender: &UserId,
        chat_id: &ConversationId,
        content: MessageContent,
    ) -> Result<()> {
        if content.is_empty() {
            return Err(MinichatError::invalid("Message is empty"));
        }
        let text = content.text.clone().unwrap_or_default();

        let delivery = self
            .store
            .write(|s| {
                let members = s.conversation_members(chat_id)?;
                if !members.contains(sender) {
                    return None;
                }
                let is_group = members.kind == ConversationKind::Group;

                let appended = s.append_message(chat_id, sender, content, now_millis());
                let level_up = if is_group {
                    None
                } else {
                    s.record_private_message(sender)
                };
                let bot = if is_group {
                    None
                } else {
                    members
                        .members
                        .iter()
                        .find(|m| *m != sender && is_bot(m))
                        .cloned()
                };

                Some(Delivery {
                    view: MessageView {
                        message: appended.message,
                        from_user: s.profile(sender),
                    },
                    members: members.members,
                    is_group,
                    first: appended.first,
                    level_up,
                    bot,
                })
            })
            .await;

        let Some(delivery) = delivery else {
            debug!(chat = %chat_id, sender = %sender, "dropping message from non-participant");
            return Ok(());
        };

        if delivery.first {
            self.store.save_now().await;
        } else {
            self.store.schedule_save();
        }

        let event = ServerEvent::NewMessage {
            chat_id: chat_id.clone(),
            is_group: delivery.is_group,
            message: delivery.view,
        };
        let delivered = self.registry.send_to_many(&delivery.members, &event).await;
        debug!(chat = %chat_id, sender = %sender, delivered, "message routed");

        if let Some(level_up) = delivery.level_up {
            info!(user = %sender, level = level_up.level, "level up");
            self.registry
                .send_to(
                    sender,
                    ServerEvent::LevelUp {
                        level: level_up.level,
                        bonus: level_up.bonus,
                    },
                )
                .await;
        }

        if let Some(bot) = delivery.bot {
            self.schedule_bot_reply(chat_id.clone(), bot, &text).await;
        }
        Ok(())
    }

    async fn schedule_bot_reply(&self, chat_id: ConversationId, bot: UserId, text: &str) {
        let (delay, reply) = {
            let mut rng = rand::thread_rng();
            (
                bots::reply_delay(&mut rng),
                bots::reply(bot.as_str(), text, &mut rng),
            )
        };

        let router = self.clone();
        let task_chat = chat_id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            router.deliver_bot_reply(&task_chat, &bot, reply).await;
        });

        let mut tasks = self.bot_tasks.lock().await;
        let pending = tasks.entry(chat_id).or_default();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    /// Append the bot's reply if the chat still exists with the bot in it.
    async fn deliver_bot_reply(&self, chat_id: &ConversationId, bot: &UserId, reply: String) {
        let delivery = self
            .store
            .write(|s| {
                let members = s.conversation_members(chat_id)?;
                if !members.contains(bot) {
                    return None;
                }
                let appended = s.append_message(chat_id, bot, MessageContent::text(reply), now_millis());
                Some((
                    members.members,
                    MessageView {
                        message: appended.message,
                        from_user: s.profile(bot),
                    },
                ))
            })
            .await;

        let Some((members, view)) = delivery else {
            debug!(chat = %chat_id, bot = %bot, "chat gone, dropping bot reply");
            return;
        };
        self.store.schedule_save();

        let event = ServerEvent::NewMessage {
            chat_id: chat_id.clone(),
            is_group: false,
            message: view,
        };
        self.registry.send_to_many(&members, &event).await;
    }

    /// Abort bot replies still pending for `chat_id`.
    pub async fn cancel_bot_replies(&self, chat_id: &ConversationId) -> usize {
        let handles = self.bot_tasks.lock().await.remove(chat_id).unwrap_or_default();
        let mut aborted = 0;
        for handle in handles {
            if !handle.is_finished() {
                handle.abort();
                aborted += 1;
            }
        }
        if aborted > 0 {
            debug!(chat = %chat_id, aborted, "cancelled pending bot replies");
        }
        aborted
    }

    /// Delete a private chat with its messages. Participants only.
    pub async fn delete_chat(&self, chat_id: &ConversationId, by: &UserId) -> Result<PrivateChat> {
        let chat = self.store.write(|s| s.delete_private_chat(chat_id, by)).await?;
        self.cancel_bot_replies(chat_id).await;
        self.store.schedule_save();
        info!(chat = %chat_id, by = %by, "chat deleted");
        Ok(chat)
    }

    /// Relay a typing indicator to the other members of a conversation.
    pub async fn typing(&self, user: &UserId, chat_id: &ConversationId) {
        let members = self.store.read(|s| s.conversation_members(chat_id)).await;
        let Some(members) = members.filter(|m| m.contains(user)) else {
            return;
        };
        let event = ServerEvent::Typing {
            chat_id: chat_id.clone(),
            user_id: user.clone(),
        };
        let others: Vec<&UserId> = members.members.iter().filter(|m| *m != user).collect();
        self.registry.send_to_many(others, &event).await;
    }

    /// Reset `user`'s unread counter for a conversation.
    pub async fn read(&self, user: &UserId, chat_id: &ConversationId) {
        if self.store.write(|s| s.mark_read(chat_id, user)).await {
            self.store.schedule_save();
        }
    }

    /// Append to a channel's posts or chat and deliver to its members.
    pub async fn channel_message(
        &self,
        user: &UserId,
        channel_id: &ConversationId,
        endpoint: ChannelEndpoint,
        text: Option<String>,
        image: Option<String>,
        mode: SaveMode,
    ) -> Result<ChannelMessage> {
        let (message, author, members) = self
            .store
            .write(|s| {
                let message =
                    s.append_channel_message(channel_id, user, endpoint, text, image, now_millis())?;
                let members = s
                    .channel(channel_id)
                    .map(|c| c.members.clone())
                    .unwrap_or_default();
                Ok::<_, MinichatError>((message, s.profile(user), members))
            })
            .await?;

        match mode {
            SaveMode::Sync => self.store.save_now().await,
            SaveMode::Debounced => self.store.schedule_save(),
        }

        let view = ChannelMessageView {
            message: message.clone(),
            author,
        };
        let event = match endpoint {
            ChannelEndpoint::Post => ServerEvent::ChannelPost {
                channel_id: channel_id.clone(),
                post: view,
            },
            ChannelEndpoint::Chat => ServerEvent::ChannelChat {
                channel_id: channel_id.clone(),
                message: view,
            },
        };
        let delivered = self.registry.send_to_many(&members, &event).await;
        debug!(channel = %channel_id, ?endpoint, delivered, "channel message routed");
        Ok(message)
    }

    /// Notify a user that they were added to a group.
    pub async fn group_invite(&self, target: &UserId, group_id: &ConversationId, group_name: String) {
        let event = ServerEvent::GroupInvite {
            group_id: group_id.clone(),
            group_name,
        };
        if !self.registry.send_to(target, event).await {
            warn!(user = %target, group = %group_id, "invitee offline, invite not pushed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_user, connect, drain, test_state};
    use minichat_shared::bots::AI_BOT;
    use minichat_store::channels::NewChannel;
    use minichat_store::groups::NewGroup;
    use std::time::Duration;

    fn new_messages(events: &[ServerEvent]) -> Vec<&MessageView> {
        events
            .iter()
            .filter_map(|e| match e {
                ServerEvent::NewMessage { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn group_message_reaches_online_members_once() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let b = add_user(&state.store, "boris").await;
        let c = add_user(&state.store, "clara").await;
        let outsider = add_user(&state.store, "olga").await;
        let group = state
            .store
            .write(|s| {
                let g = s.create_group(&a, NewGroup { name: "Team".into(), ..NewGroup::default() }, 0)?;
                s.join_group(&g.id, &b)?;
                s.join_group(&g.id, &c)?;
                Ok::<_, MinichatError>(g.id)
            })
            .await
            .unwrap();

        let mut rx_a = connect(&state, &a).await;
        let mut rx_b = connect(&state, &b).await;
        let mut rx_o = connect(&state, &outsider).await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_o);

        state
            .router
            .send_message(&a, &group, MessageContent::text("hi all"))
            .await
            .unwrap();
        state
            .router
            .send_message(&outsider, &group, MessageContent::text("let me in"))
            .await
            .unwrap();

        let stored = state.store.read(|s| s.messages(&group).to_vec()).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content.text.as_deref(), Some("hi all"));

        for rx in [&mut rx_a, &mut rx_b] {
            let events = drain(rx);
            assert_eq!(events.len(), 1);
            assert!(matches!(&events[0], ServerEvent::NewMessage { is_group: true, .. }));
            assert_eq!(new_messages(&events)[0].message.id, stored[0].id);
        }
        assert!(drain(&mut rx_o).is_empty());

        let unread = state.store.read(|s| s.group(&group).unwrap().unread.get(&c).copied()).await;
        assert_eq!(unread, Some(1));
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let b = add_user(&state.store, "boris").await;
        let chat = state.store.write(|s| s.open_private_chat(&a, &b, 0).0.id).await;

        let err = state
            .router
            .send_message(&a, &chat, MessageContent::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MinichatError::Validation(_)));
        assert!(state.store.read(|s| s.messages(&chat).is_empty()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn hundred_messages_to_a_bot_level_up_once() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let bot = UserId::from(AI_BOT);
        let chat = state.store.write(|s| s.open_private_chat(&a, &bot, 0).0.id).await;
        let balance_before = state.store.read(|s| s.user(&a).unwrap().balance).await;
        let mut rx = connect(&state, &a).await;

        for i in 0..100 {
            state
                .router
                .send_message(&a, &chat, MessageContent::text(format!("msg {i}")))
                .await
                .unwrap();
        }

        let events = drain(&mut rx);
        let level_ups: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::LevelUp { .. }))
            .collect();
        assert_eq!(level_ups, vec![&ServerEvent::LevelUp { level: 2, bonus: 20 }]);

        let user = state.store.read(|s| s.user(&a).cloned().unwrap()).await;
        assert_eq!(user.level, 2);
        assert_eq!(user.xp, 0);
        assert_eq!(user.balance, balance_before + 20);
    }

    #[tokio::test(start_paused = true)]
    async fn bot_replies_after_delay() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let bot = UserId::from(AI_BOT);
        let chat = state.store.write(|s| s.open_private_chat(&a, &bot, 0).0.id).await;
        let mut rx = connect(&state, &a).await;

        state
            .router
            .send_message(&a, &chat, MessageContent::text("hello"))
            .await
            .unwrap();
        assert_eq!(new_messages(&drain(&mut rx)).len(), 1);

        tokio::time::sleep(Duration::from_millis(1600)).await;

        let events = drain(&mut rx);
        let replies = new_messages(&events);
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].message.from, bot);
        assert!(replies[0].from_user.as_ref().is_some_and(|p| p.is_bot));
        assert_eq!(state.store.read(|s| s.messages(&chat).len()).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_chat_cancels_pending_bot_reply() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let bot = UserId::from(AI_BOT);
        let chat = state.store.write(|s| s.open_private_chat(&a, &bot, 0).0.id).await;
        let mut rx = connect(&state, &a).await;

        state
            .router
            .send_message(&a, &chat, MessageContent::text("hello"))
            .await
            .unwrap();
        state.router.delete_chat(&chat, &a).await.unwrap();
        drain(&mut rx);

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(new_messages(&drain(&mut rx)).is_empty());
        assert!(state.store.read(|s| s.messages(&chat).is_empty()).await);
    }

    #[tokio::test]
    async fn typing_skips_the_typist() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let b = add_user(&state.store, "boris").await;
        let chat = state.store.write(|s| s.open_private_chat(&a, &b, 0).0.id).await;
        let mut rx_a = connect(&state, &a).await;
        let mut rx_b = connect(&state, &b).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        state.router.typing(&a, &chat).await;
        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::Typing { chat_id: chat, user_id: a }]
        );
    }

    #[tokio::test]
    async fn channel_posts_go_to_members_only() {
        let (_dir, state) = test_state().await;
        let owner = add_user(&state.store, "owner").await;
        let member = add_user(&state.store, "member").await;
        let stranger = add_user(&state.store, "stranger").await;
        let channel = state
            .store
            .write(|s| {
                let c = s.create_channel(
                    &owner,
                    NewChannel { name: "News".into(), ..NewChannel::default() },
                    0,
                )?;
                s.join_channel(&c.id, &member)?;
                Ok::<_, MinichatError>(c.id)
            })
            .await
            .unwrap();

        let mut rx_m = connect(&state, &member).await;
        let mut rx_s = connect(&state, &stranger).await;
        drain(&mut rx_m);
        drain(&mut rx_s);

        let denied = state
            .router
            .channel_message(&member, &channel, ChannelEndpoint::Post, Some("hey".into()), None, SaveMode::Debounced)
            .await
            .unwrap_err();
        assert!(matches!(denied, MinichatError::Permission(_)));

        state
            .router
            .channel_message(&owner, &channel, ChannelEndpoint::Post, Some("launch".into()), None, SaveMode::Sync)
            .await
            .unwrap();

        assert!(matches!(
            drain(&mut rx_m).as_slice(),
            [ServerEvent::ChannelPost { post, .. }] if post.message.text.as_deref() == Some("launch")
        ));
        assert!(drain(&mut rx_s).is_empty());
    }
}
