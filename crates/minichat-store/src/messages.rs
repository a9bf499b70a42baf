use minichat_shared::bots;
use minichat_shared::types::{
    ChatMessage, ConversationId, MessageContent, MessageId, Timestamp, UserId,
};
use minichat_shared::{MinichatError, Result};

use crate::chats::ConversationKind;
use crate::models::StateGraph;

/// Result of an append.
#[derive(Debug, Clone)]
pub struct Appended {
    pub message: ChatMessage,
    /// The conversation had no messages before this one.
    pub first: bool,
}

impl StateGraph {
    /// Messages of a private chat or group, in insertion order.
    pub fn messages(&self, id: &ConversationId) -> &[ChatMessage] {
        self.messages.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Messages of a conversation `user` belongs to.
    pub fn messages_for(&self, id: &ConversationId, user: &UserId) -> Result<&[ChatMessage]> {
        match self.conversation_members(id) {
            Some(m) if m.contains(user) => Ok(self.messages(id)),
            Some(m) if m.kind == ConversationKind::Group => Err(MinichatError::not_found("Group")),
            _ => Err(MinichatError::not_found("Chat")),
        }
    }

    /// Append a message and bump unread counters of everyone but the sender.
    ///
    /// `created_at` never goes below the previous message's timestamp, so the
    /// sequence stays non-decreasing even if the clock steps back. Membership
    /// is the caller's concern.
    pub fn append_message(
        &mut self,
        id: &ConversationId,
        from: &UserId,
        content: MessageContent,
        now: Timestamp,
    ) -> Appended {
        let seq = self.messages.entry(id.clone()).or_default();
        let created_at = stamp_after(seq, now);
        let first = seq.is_empty();

        let message = ChatMessage {
            id: MessageId::new(),
            from: from.clone(),
            content,
            created_at,
            saved_from: None,
        };
        seq.push(message.clone());

        let unread = if let Some(group) = self.groups.get_mut(id) {
            let members = group.members.clone();
            Some((&mut group.unread, members))
        } else {
            self.chats
                .get_mut(id)
                .map(|chat| {
                    let members = chat.participants.to_vec();
                    (&mut chat.unread, members)
                })
        };
        if let Some((counters, members)) = unread {
            for member in members.iter().filter(|m| *m != from && !bots::is_bot(m)) {
                *counters.entry(member.clone()).or_insert(0) += 1;
            }
        }

        Appended { message, first }
    }

    /// Empty a conversation's message sequence. Participants only.
    pub fn clear_messages(&mut self, id: &ConversationId, by: &UserId) -> Result<()> {
        match self.conversation_members(id) {
            Some(m) if m.contains(by) => {
                self.messages.insert(id.clone(), Vec::new());
                Ok(())
            }
            _ => Err(MinichatError::not_found("Chat")),
        }
    }

    /// Reset `user`'s unread counter. Returns whether anything changed.
    pub fn mark_read(&mut self, id: &ConversationId, user: &UserId) -> bool {
        let counters = match self.groups.get_mut(id) {
            Some(group) => &mut group.unread,
            None => match self.chats.get_mut(id) {
                Some(chat) => &mut chat.unread,
                None => return false,
            },
        };
        counters.insert(user.clone(), 0).is_some_and(|prev| prev != 0)
    }

    /// Copy a message into `user`'s saved-messages chat, creating the chat
    /// if needed. Returns the copy and whether the chat was created, or
    /// `Ok(None)` if the source message does not exist.
    pub fn save_to_favorites(
        &mut self,
        user: &UserId,
        source_chat: &ConversationId,
        message_id: &MessageId,
        now: Timestamp,
    ) -> Result<Option<(ChatMessage, bool)>> {
        let source = self
            .messages_for(source_chat, user)?
            .iter()
            .find(|m| m.id == *message_id)
            .cloned();
        let Some(source) = source else {
            return Ok(None);
        };

        let saved = UserId::from(bots::SAVED);
        let (chat, created) = self.open_private_chat(user, &saved, now);
        let seq = self.messages.entry(chat.id).or_default();
        let copy = ChatMessage {
            id: MessageId::new(),
            saved_from: Some(source_chat.clone()),
            created_at: stamp_after(seq, now),
            ..source
        };
        seq.push(copy.clone());
        Ok(Some((copy, created)))
    }
}

/// Timestamps within one sequence never decrease, even if the clock steps back.
fn stamp_after(seq: &[ChatMessage], now: Timestamp) -> Timestamp {
    seq.last().map_or(now, |last| now.max(last.created_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_list_preserve_order_and_fields() {
        let mut state = StateGraph::default();
        let (a, b) = (UserId::from("a"), UserId::from("b"));
        let (chat, _) = state.open_private_chat(&a, &b, 0);

        let first = state.append_message(&chat.id, &a, MessageContent::text("one"), 10);
        assert!(first.first);
        let second = state.append_message(&chat.id, &b, MessageContent::text("two"), 20);
        assert!(!second.first);

        let listed = state.messages_for(&chat.id, &a).unwrap();
        assert_eq!(listed, &[first.message, second.message]);
        assert_eq!(listed[0].from, a);
        assert_eq!(listed[0].content.text.as_deref(), Some("one"));
        assert_eq!(listed[1].created_at, 20);
    }

    #[test]
    fn timestamps_never_decrease() {
        let mut state = StateGraph::default();
        let id = ConversationId::from("c");
        let a = UserId::from("a");
        state.append_message(&id, &a, MessageContent::text("late"), 100);
        let early = state.append_message(&id, &a, MessageContent::text("early"), 50);
        assert_eq!(early.message.created_at, 100);
    }

    #[test]
    fn unread_counts_skip_sender_and_reset_on_read() {
        let mut state = StateGraph::default();
        let (a, b) = (UserId::from("a"), UserId::from("b"));
        let (chat, _) = state.open_private_chat(&a, &b, 0);

        state.append_message(&chat.id, &a, MessageContent::text("x"), 1);
        state.append_message(&chat.id, &a, MessageContent::text("y"), 2);
        let unread = &state.private_chat(&chat.id).unwrap().unread;
        assert_eq!(unread.get(&b), Some(&2));
        assert_eq!(unread.get(&a), None);

        assert!(state.mark_read(&chat.id, &b));
        assert!(!state.mark_read(&chat.id, &b));
        assert_eq!(state.private_chat(&chat.id).unwrap().unread.get(&b), Some(&0));
    }

    #[test]
    fn outsiders_cannot_read_or_clear() {
        let mut state = StateGraph::default();
        let (a, b, c) = (UserId::from("a"), UserId::from("b"), UserId::from("c"));
        let (chat, _) = state.open_private_chat(&a, &b, 0);
        state.append_message(&chat.id, &a, MessageContent::text("x"), 1);

        assert!(state.messages_for(&chat.id, &c).is_err());
        assert!(state.clear_messages(&chat.id, &c).is_err());
        state.clear_messages(&chat.id, &b).unwrap();
        assert!(state.messages(&chat.id).is_empty());
    }

    #[test]
    fn favorites_copy_into_saved_chat() {
        let mut state = StateGraph::default();
        let (a, b) = (UserId::from("a"), UserId::from("b"));
        let (chat, _) = state.open_private_chat(&a, &b, 0);
        let msg = state
            .append_message(&chat.id, &b, MessageContent::text("keep"), 1)
            .message;

        let (copy, created) = state.save_to_favorites(&a, &chat.id, &msg.id, 5).unwrap().unwrap();
        assert!(created);
        assert_ne!(copy.id, msg.id);
        assert_eq!(copy.saved_from.as_ref(), Some(&chat.id));
        assert_eq!(copy.from, b);

        let saved = state.find_private_chat(&a, &UserId::from("saved")).unwrap().id.clone();
        assert_eq!(state.messages(&saved).len(), 1);

        let missing = MessageId::from("nope");
        assert!(state.save_to_favorites(&a, &chat.id, &missing, 6).unwrap().is_none());
    }

    #[test]
    fn favorites_keep_saved_chat_ordered_when_clock_steps_back() {
        let mut state = StateGraph::default();
        let (a, b) = (UserId::from("a"), UserId::from("b"));
        let (chat, _) = state.open_private_chat(&a, &b, 0);
        let first = state
            .append_message(&chat.id, &b, MessageContent::text("one"), 1)
            .message;
        let second = state
            .append_message(&chat.id, &b, MessageContent::text("two"), 2)
            .message;

        let (early, _) = state.save_to_favorites(&a, &chat.id, &first.id, 100).unwrap().unwrap();
        let (late, created) = state.save_to_favorites(&a, &chat.id, &second.id, 40).unwrap().unwrap();
        assert!(!created);
        assert_eq!(early.created_at, 100);
        assert_eq!(late.created_at, 100);
    }
}
