//! Group records, group membership and persisted group-call rosters.

use minichat_shared::constants::{MAX_GROUP_DESCRIPTION_LEN, MAX_NAME_LEN};
use minichat_shared::types::{CallId, ConversationId, Timestamp, UserId, UserProfile};
use minichat_shared::{MinichatError, Result};

use crate::clip;
use crate::models::{Group, GroupCall, StateGraph};

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub avatar: Option<String>,
}

/// Partial update; `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub avatar: Option<Option<String>>,
}

/// Roster change produced by a group-call operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    pub group_id: ConversationId,
    pub group_name: String,
    pub call_id: CallId,
    /// Participants after the change. Empty means the call was destroyed.
    pub participants: Vec<UserId>,
    /// Group members to notify.
    pub members: Vec<UserId>,
}

impl Roster {
    pub fn ended(&self) -> bool {
        self.participants.is_empty()
    }
}

fn group_not_found() -> MinichatError {
    MinichatError::not_found("Group")
}

impl StateGraph {
    // ------------------------------------------------------------------
    // Create / read
    // ------------------------------------------------------------------

    pub fn create_group(&mut self, owner: &UserId, new: NewGroup, now: Timestamp) -> Result<Group> {
        let name = clip(new.name.trim(), MAX_NAME_LEN);
        if name.is_empty() {
            return Err(MinichatError::invalid("Group name is required"));
        }

        let group = Group {
            id: ConversationId::new(),
            name,
            description: clip(new.description.as_deref().unwrap_or(""), MAX_GROUP_DESCRIPTION_LEN),
            avatar: new.avatar,
            owner_id: owner.clone(),
            members: vec![owner.clone()],
            admins: vec![owner.clone()],
            unread: Default::default(),
            created_at: now,
        };
        self.groups.insert(group.id.clone(), group.clone());
        self.messages.insert(group.id.clone(), Vec::new());
        Ok(group)
    }

    pub fn group(&self, id: &ConversationId) -> Option<&Group> {
        self.groups.get(id)
    }

    pub fn groups_for(&self, user: &UserId) -> Vec<&Group> {
        self.groups.values().filter(|g| g.is_member(user)).collect()
    }

    /// Member profiles in join order; members without a record are skipped.
    pub fn member_profiles(&self, members: &[UserId]) -> Vec<UserProfile> {
        members.iter().filter_map(|m| self.profile(m)).collect()
    }

    fn group_mut(&mut self, id: &ConversationId) -> Result<&mut Group> {
        self.groups.get_mut(id).ok_or_else(group_not_found)
    }

    fn group_as_admin(&mut self, id: &ConversationId, by: &UserId) -> Result<&mut Group> {
        let group = self.group_mut(id)?;
        if !group.is_admin(by) {
            return Err(MinichatError::forbidden("Not allowed"));
        }
        Ok(group)
    }

    // ------------------------------------------------------------------
    // Update / delete
    // ------------------------------------------------------------------

    pub fn update_group(&mut self, id: &ConversationId, by: &UserId, update: GroupUpdate) -> Result<Group> {
        let group = self.group_as_admin(id, by)?;
        if let Some(name) = update.name.map(|n| clip(n.trim(), MAX_NAME_LEN)) {
            if !name.is_empty() {
                group.name = name;
            }
        }
        if let Some(description) = update.description {
            group.description = clip(&description, MAX_GROUP_DESCRIPTION_LEN);
        }
        if let Some(avatar) = update.avatar {
            group.avatar = avatar;
        }
        Ok(group.clone())
    }

    /// Remove a group with its messages and any running call. Owner only.
    ///
    /// A running call comes back as an ended [`Roster`] addressed to the
    /// former members.
    pub fn delete_group(&mut self, id: &ConversationId, by: &UserId) -> Result<(Group, Option<Roster>)> {
        let group = self.groups.get(id).ok_or_else(group_not_found)?;
        if group.owner_id != *by {
            return Err(MinichatError::forbidden("Only the owner can delete the group"));
        }
        self.messages.remove(id);
        let group = self.groups.remove(id).ok_or_else(group_not_found)?;
        let ended = self.group_calls.remove(id).map(|call| Roster {
            group_id: id.clone(),
            group_name: group.name.clone(),
            call_id: call.id,
            participants: Vec::new(),
            members: group.members.clone(),
        });
        Ok((group, ended))
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    pub fn join_group(&mut self, id: &ConversationId, user: &UserId) -> Result<bool> {
        let group = self.group_mut(id)?;
        if group.is_member(user) {
            return Ok(false);
        }
        group.members.push(user.clone());
        Ok(true)
    }

    /// Leave a group. A running call loses the user too; the changed
    /// roster is returned.
    pub fn leave_group(&mut self, id: &ConversationId, user: &UserId) -> Result<Option<Roster>> {
        let group = self.group_mut(id)?;
        if group.owner_id == *user {
            return Err(MinichatError::invalid("The owner cannot leave the group"));
        }
        group.members.retain(|m| m != user);
        group.admins.retain(|m| m != user);
        group.unread.remove(user);
        Ok(self.drop_from_call(id, user))
    }

    /// Add `target` as a member. Admins only. Returns `false` if the user
    /// already was a member.
    pub fn add_group_member(&mut self, id: &ConversationId, by: &UserId, target: &UserId) -> Result<bool> {
        if !self.users.contains_key(target) {
            return Err(MinichatError::not_found("User"));
        }
        let group = self.group_as_admin(id, by)?;
        if group.is_member(target) {
            return Ok(false);
        }
        group.members.push(target.clone());
        Ok(true)
    }

    /// Remove a member. Admins only; the owner stays. Like
    /// [`leave_group`](Self::leave_group), returns the changed call roster.
    pub fn kick_group_member(
        &mut self,
        id: &ConversationId,
        by: &UserId,
        target: &UserId,
    ) -> Result<Option<Roster>> {
        let group = self.group_as_admin(id, by)?;
        if group.owner_id == *target {
            return Err(MinichatError::invalid("The owner cannot be kicked"));
        }
        group.members.retain(|m| m != target);
        group.admins.retain(|m| m != target);
        group.unread.remove(target);
        Ok(self.drop_from_call(id, target))
    }

    /// Grant or revoke admin rights. Owner only; target must be a member.
    pub fn set_group_admin(&mut self, id: &ConversationId, by: &UserId, target: &UserId, admin: bool) -> Result<()> {
        let group = self.group_mut(id)?;
        if group.owner_id != *by {
            return Err(MinichatError::forbidden("Only the owner can appoint admins"));
        }
        if !group.is_member(target) {
            return Err(MinichatError::invalid("User is not a member of the group"));
        }
        if admin {
            if !group.admins.contains(target) {
                group.admins.push(target.clone());
            }
        } else if *target != group.owner_id {
            group.admins.retain(|m| m != target);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Group calls
    // ------------------------------------------------------------------

    pub fn group_call(&self, group_id: &ConversationId) -> Option<&GroupCall> {
        self.group_calls.get(group_id)
    }

    /// Start a call in a group, or join the one already running.
    pub fn start_group_call(&mut self, group_id: &ConversationId, user: &UserId, now: Timestamp) -> Result<Roster> {
        let group = match self.groups.get(group_id) {
            Some(g) if g.is_member(user) => g,
            _ => return Err(MinichatError::Call("Group not found".into())),
        };
        let (group_name, members) = (group.name.clone(), group.members.clone());

        let call = self
            .group_calls
            .entry(group_id.clone())
            .or_insert_with(|| GroupCall {
                id: CallId::new(),
                group_id: group_id.clone(),
                participants: Vec::new(),
                started_at: now,
            });
        if !call.participants.contains(user) {
            call.participants.push(user.clone());
        }

        Ok(Roster {
            group_id: group_id.clone(),
            group_name,
            call_id: call.id.clone(),
            participants: call.participants.clone(),
            members,
        })
    }

    /// Join a running call. Group members only.
    pub fn join_group_call(&mut self, group_id: &ConversationId, user: &UserId) -> Result<Roster> {
        let not_found = || MinichatError::Call("Call not found".into());
        let group = self.groups.get(group_id).ok_or_else(not_found)?;
        if !group.is_member(user) {
            return Err(not_found());
        }
        let (group_name, members) = (group.name.clone(), group.members.clone());

        let call = self.group_calls.get_mut(group_id).ok_or_else(not_found)?;
        if !call.participants.contains(user) {
            call.participants.push(user.clone());
        }

        Ok(Roster {
            group_id: group_id.clone(),
            group_name,
            call_id: call.id.clone(),
            participants: call.participants.clone(),
            members,
        })
    }

    /// Remove `user` from a call roster, destroying the call once empty.
    /// `None` if there is no such call.
    pub fn leave_group_call(&mut self, group_id: &ConversationId, user: &UserId) -> Option<Roster> {
        let group = self.groups.get(group_id)?;
        let (group_name, members) = (group.name.clone(), group.members.clone());

        let call = self.group_calls.get_mut(group_id)?;
        call.participants.retain(|p| p != user);
        let roster = Roster {
            group_id: group_id.clone(),
            group_name,
            call_id: call.id.clone(),
            participants: call.participants.clone(),
            members,
        };

        if roster.ended() {
            self.group_calls.remove(group_id);
        }
        Some(roster)
    }

    /// Take `user` off the group's call, if they are on it.
    fn drop_from_call(&mut self, group_id: &ConversationId, user: &UserId) -> Option<Roster> {
        let on_call = self
            .group_calls
            .get(group_id)
            .is_some_and(|call| call.participants.contains(user));
        if !on_call {
            return None;
        }
        self.leave_group_call(group_id, user)
    }

    /// Remove `user` from every roster they are on.
    pub fn leave_all_group_calls(&mut self, user: &UserId) -> Vec<Roster> {
        let groups: Vec<ConversationId> = self
            .group_calls
            .iter()
            .filter(|(_, call)| call.participants.contains(user))
            .map(|(id, _)| id.clone())
            .collect();

        groups
            .iter()
            .filter_map(|g| self.leave_group_call(g, user))
            .collect()
    }
}
