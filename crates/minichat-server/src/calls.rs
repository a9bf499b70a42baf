//! Call coordination.
//!
//! 1:1 calls live only in memory: a call is `Ringing` until the callee
//! accepts it and is removed when either side ends it or disconnects.
//! Group-call rosters are part of the state graph and go through the
//! store. The server never looks inside signaling payloads.

use std::collections::HashMap;
use std::sync::Arc;

use minichat_shared::protocol::{ServerEvent, Signal};
use minichat_shared::types::{now_millis, CallId, CallState, ConversationId, Timestamp, UserId};
use minichat_shared::{MinichatError, Result};
use minichat_store::{Roster, Store};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::registry::ConnectionRegistry;

#[derive(Debug, Clone)]
struct Call {
    caller: UserId,
    callee: UserId,
    state: CallState,
    started_at: Timestamp,
}

impl Call {
    /// The other endpoint, if `user` is one of the two.
    fn counterpart(&self, user: &UserId) -> Option<&UserId> {
        if *user == self.caller {
            Some(&self.callee)
        } else if *user == self.callee {
            Some(&self.caller)
        } else {
            None
        }
    }
}

fn call_not_found() -> MinichatError {
    MinichatError::Call("Call not found".into())
}

#[derive(Clone)]
pub struct CallCoordinator {
    calls: Arc<RwLock<HashMap<CallId, Call>>>,
    registry: ConnectionRegistry,
    store: Store,
}

impl CallCoordinator {
    pub fn new(registry: ConnectionRegistry, store: Store) -> Self {
        Self {
            calls: Arc::new(RwLock::new(HashMap::new())),
            registry,
            store,
        }
    }

    // ------------------------------------------------------------------
    // 1:1 calls
    // ------------------------------------------------------------------

    /// Ring `callee`. The caller gets `call_started`, the callee
    /// `incoming_call`.
    pub async fn start_call(&self, caller: &UserId, callee: &UserId) -> Result<CallId> {
        if caller == callee {
            return Err(MinichatError::Call("Cannot call yourself".into()));
        }

        let (caller_profile, callee_exists) = self
            .store
            .read(|s| (s.profile(caller), s.user(callee).is_some()))
            .await;
        let caller_profile = caller_profile.ok_or_else(MinichatError::unauthorized)?;
        if !callee_exists {
            return Err(MinichatError::Call("User not found".into()));
        }
        if !self.registry.is_online(callee).await {
            return Err(MinichatError::Call("User is offline".into()));
        }

        let call_id = CallId::new();
        self.calls.write().await.insert(
            call_id.clone(),
            Call {
                caller: caller.clone(),
                callee: callee.clone(),
                state: CallState::Ringing,
                started_at: now_millis(),
            },
        );

        self.registry
            .send_to(caller, ServerEvent::CallStarted { call_id: call_id.clone() })
            .await;
        self.registry
            .send_to(
                callee,
                ServerEvent::IncomingCall {
                    call_id: call_id.clone(),
                    from: caller.clone(),
                    name: caller_profile.name,
                    avatar: caller_profile.avatar,
                },
            )
            .await;

        info!(call = %call_id, caller = %caller, callee = %callee, "call ringing");
        Ok(call_id)
    }

    /// Only the callee can accept. Anyone else gets `Call not found` and
    /// the call is left untouched.
    pub async fn accept_call(&self, user: &UserId, call_id: &CallId) -> Result<()> {
        let caller = {
            let mut calls = self.calls.write().await;
            let call = calls
                .get_mut(call_id)
                .filter(|c| c.callee == *user)
                .ok_or_else(call_not_found)?;
            call.state = CallState::Connected;
            call.caller.clone()
        };

        self.registry
            .send_to(&caller, ServerEvent::CallAccepted { call_id: call_id.clone() })
            .await;
        info!(call = %call_id, "call connected");
        Ok(())
    }

    /// Tear down a call the requester is part of and tell the other side.
    /// Unknown calls are ignored.
    pub async fn end_call(&self, user: &UserId, call_id: &CallId) {
        let (counterpart, started_at) = {
            let mut calls = self.calls.write().await;
            match calls.get(call_id).and_then(|c| c.counterpart(user)).cloned() {
                Some(other) => match calls.remove(call_id) {
                    Some(call) => (other, call.started_at),
                    None => return,
                },
                None => return,
            }
        };

        self.registry
            .send_to(&counterpart, ServerEvent::CallEnded { call_id: call_id.clone() })
            .await;
        info!(
            call = %call_id,
            by = %user,
            duration_ms = now_millis().saturating_sub(started_at),
            "call ended"
        );
    }

    /// Forward a signaling payload to the other endpoint.
    pub async fn relay(&self, from: &UserId, call_id: &CallId, signal: Signal) {
        let target = self
            .calls
            .read()
            .await
            .get(call_id)
            .and_then(|c| c.counterpart(from))
            .cloned();

        match target {
            Some(target) => {
                let event = ServerEvent::rtc(call_id.clone(), from.clone(), signal);
                self.registry.send_to(&target, event).await;
            }
            None => debug!(call = %call_id, from = %from, "dropping signal for unknown call"),
        }
    }

    /// End every 1:1 call `user` takes part in. Returns how many ended.
    pub async fn end_calls_for(&self, user: &UserId) -> usize {
        let ended: Vec<(CallId, UserId)> = {
            let mut calls = self.calls.write().await;
            let ids: Vec<CallId> = calls
                .iter()
                .filter(|(_, c)| c.counterpart(user).is_some())
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| {
                    let call = calls.remove(&id)?;
                    let other = call.counterpart(user)?.clone();
                    Some((id, other))
                })
                .collect()
        };

        for (call_id, other) in &ended {
            self.registry
                .send_to(other, ServerEvent::CallEnded { call_id: call_id.clone() })
                .await;
        }
        if !ended.is_empty() {
            info!(user = %user, count = ended.len(), "calls aborted on disconnect");
        }
        ended.len()
    }

    #[cfg(test)]
    pub async fn call_state(&self, call_id: &CallId) -> Option<CallState> {
        self.calls.read().await.get(call_id).map(|c| c.state)
    }

    pub async fn active_calls(&self) -> usize {
        self.calls.read().await.len()
    }

    // ------------------------------------------------------------------
    // Group calls
    // ------------------------------------------------------------------

    /// Start or join the call of a group. The starter gets
    /// `group_call_started`, every other online member `incoming_group_call`.
    pub async fn start_group_call(&self, user: &UserId, group_id: &ConversationId) -> Result<()> {
        let roster = self
            .store
            .write(|s| s.start_group_call(group_id, user, now_millis()))
            .await?;
        self.store.schedule_save();

        let participants = self.store.read(|s| s.member_profiles(&roster.participants)).await;
        for member in &roster.members {
            let event = if member == user {
                ServerEvent::GroupCallStarted {
                    group_id: roster.group_id.clone(),
                    group_name: roster.group_name.clone(),
                    call_id: roster.call_id.clone(),
                    participants: participants.clone(),
                }
            } else {
                ServerEvent::IncomingGroupCall {
                    group_id: roster.group_id.clone(),
                    group_name: roster.group_name.clone(),
                    call_id: roster.call_id.clone(),
                    participants: participants.clone(),
                }
            };
            self.registry.send_to(member, event).await;
        }

        info!(group = %group_id, call = %roster.call_id, by = %user, "group call started");
        Ok(())
    }

    pub async fn join_group_call(&self, user: &UserId, group_id: &ConversationId) -> Result<()> {
        let roster = self.store.write(|s| s.join_group_call(group_id, user)).await?;
        self.store.schedule_save();
        self.announce(&roster).await;
        debug!(group = %group_id, user = %user, "joined group call");
        Ok(())
    }

    /// Leaving a call that does not exist is a no-op.
    pub async fn leave_group_call(&self, user: &UserId, group_id: &ConversationId) {
        let roster = self.store.write(|s| s.leave_group_call(group_id, user)).await;
        if let Some(roster) = roster {
            self.store.schedule_save();
            self.announce(&roster).await;
            debug!(group = %group_id, user = %user, ended = roster.ended(), "left group call");
        }
    }

    /// Drop `user` from every roster they are on.
    pub async fn leave_all_group_calls(&self, user: &UserId) {
        let rosters = self.store.write(|s| s.leave_all_group_calls(user)).await;
        if rosters.is_empty() {
            return;
        }
        self.store.schedule_save();
        for roster in &rosters {
            self.announce(roster).await;
        }
    }

    /// Point-to-point relay inside a group call. Both ends must be on the
    /// group's roster; anything else is dropped.
    pub async fn group_relay(
        &self,
        from: &UserId,
        group_id: &ConversationId,
        to: &UserId,
        signal: Signal,
    ) {
        let on_roster = self
            .store
            .read(|s| {
                s.group_call(group_id).is_some_and(|call| {
                    call.participants.contains(from) && call.participants.contains(to)
                })
            })
            .await;
        if !on_roster {
            debug!(group = %group_id, from = %from, to = %to, "dropping group signal outside the roster");
            return;
        }

        let event = ServerEvent::group_rtc(group_id.clone(), from.clone(), to.clone(), signal);
        if !self.registry.send_to(to, event).await {
            debug!(from = %from, to = %to, "group signal target offline");
        }
    }

    /// Send the roster to every member: `group_call_updated`, or
    /// `group_call_ended` once nobody is left.
    pub async fn announce(&self, roster: &Roster) {
        let participants = self.store.read(|s| s.member_profiles(&roster.participants)).await;
        let event = if roster.ended() {
            ServerEvent::GroupCallEnded {
                group_id: roster.group_id.clone(),
                participants,
            }
        } else {
            ServerEvent::GroupCallUpdated {
                group_id: roster.group_id.clone(),
                participants,
            }
        };
        self.registry.send_to_many(&roster.members, &event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{add_user, connect, drain, test_state};
    use minichat_store::groups::NewGroup;
    use serde_json::json;

    #[tokio::test]
    async fn accept_is_reserved_for_the_callee() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let b = add_user(&state.store, "boris").await;
        let c = add_user(&state.store, "clara").await;
        let mut rx_a = connect(&state, &a).await;
        let mut rx_b = connect(&state, &b).await;
        let _rx_c = connect(&state, &c).await;
        drain(&mut rx_a);
        drain(&mut rx_b);

        let call_id = state.calls.start_call(&a, &b).await.unwrap();
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::CallStarted { call_id: call_id.clone() }]
        );
        assert!(matches!(
            drain(&mut rx_b).as_slice(),
            [ServerEvent::IncomingCall { from, name, .. }] if *from == a && name == "anna"
        ));

        let err = state.calls.accept_call(&c, &call_id).await.unwrap_err();
        assert_eq!(err, MinichatError::Call("Call not found".into()));
        assert_eq!(state.calls.call_state(&call_id).await, Some(CallState::Ringing));

        state.calls.accept_call(&b, &call_id).await.unwrap();
        assert_eq!(state.calls.call_state(&call_id).await, Some(CallState::Connected));
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::CallAccepted { call_id }]
        );
    }

    #[tokio::test]
    async fn start_call_requires_an_online_callee() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let b = add_user(&state.store, "boris").await;

        let offline = state.calls.start_call(&a, &b).await.unwrap_err();
        assert_eq!(offline, MinichatError::Call("User is offline".into()));

        let missing = state.calls.start_call(&a, &UserId::from("ghost")).await.unwrap_err();
        assert_eq!(missing, MinichatError::Call("User not found".into()));

        assert!(state.calls.start_call(&a, &a).await.is_err());
        assert_eq!(state.calls.active_calls().await, 0);
    }

    #[tokio::test]
    async fn end_notifies_counterpart_once() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let b = add_user(&state.store, "boris").await;
        let mut rx_a = connect(&state, &a).await;
        let mut rx_b = connect(&state, &b).await;

        let call_id = state.calls.start_call(&a, &b).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        state.calls.end_call(&b, &call_id).await;
        state.calls.end_call(&b, &call_id).await;
        state.calls.end_call(&a, &call_id).await;

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::CallEnded { call_id: call_id.clone() }]
        );
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(state.calls.call_state(&call_id).await, None);
    }

    #[tokio::test]
    async fn relay_forwards_payload_with_sender() {
        let (_dir, state) = test_state().await;
        let a = add_user(&state.store, "anna").await;
        let b = add_user(&state.store, "boris").await;
        let mut rx_a = connect(&state, &a).await;
        let mut rx_b = connect(&state, &b).await;
        let call_id = state.calls.start_call(&a, &b).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        let sdp = json!({ "sdp": "v=0", "type": "offer" });
        state.calls.relay(&a, &call_id, Signal::Offer(sdp.clone())).await;
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::RtcOffer { call_id: call_id.clone(), from: a.clone(), offer: sdp }]
        );

        let outsider = add_user(&state.store, "olga").await;
        state.calls.relay(&outsider, &call_id, Signal::Ice(json!({}))).await;
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn group_call_roster_lifecycle() {
        let (_dir, state) = test_state().await;
        let x = add_user(&state.store, "xenia").await;
        let y = add_user(&state.store, "yuri").await;
        let z = add_user(&state.store, "zoya").await;
        let group = state
            .store
            .write(|s| {
                let g = s.create_group(&x, NewGroup { name: "Trio".into(), ..NewGroup::default() }, 0)?;
                s.join_group(&g.id, &y)?;
                s.join_group(&g.id, &z)?;
                Ok::<_, MinichatError>(g.id)
            })
            .await
            .unwrap();

        let mut rx_x = connect(&state, &x).await;
        let mut rx_y = connect(&state, &y).await;
        let mut rx_z = connect(&state, &z).await;
        for rx in [&mut rx_x, &mut rx_y, &mut rx_z] {
            drain(rx);
        }

        let ids = |events: Vec<ServerEvent>| -> Vec<Vec<UserId>> {
            events
                .into_iter()
                .filter_map(|e| match e {
                    ServerEvent::GroupCallStarted { participants, .. }
                    | ServerEvent::IncomingGroupCall { participants, .. }
                    | ServerEvent::GroupCallUpdated { participants, .. } => {
                        Some(participants.into_iter().map(|p| p.id).collect())
                    }
                    _ => None,
                })
                .collect()
        };

        state.calls.start_group_call(&x, &group).await.unwrap();
        assert!(matches!(drain(&mut rx_x).as_slice(), [ServerEvent::GroupCallStarted { .. }]));
        assert!(matches!(drain(&mut rx_y).as_slice(), [ServerEvent::IncomingGroupCall { .. }]));
        drain(&mut rx_z);

        state.calls.join_group_call(&y, &group).await.unwrap();
        for rx in [&mut rx_x, &mut rx_y, &mut rx_z] {
            assert_eq!(ids(drain(rx)), vec![vec![x.clone(), y.clone()]]);
        }

        state.calls.join_group_call(&z, &group).await.unwrap();
        assert_eq!(ids(drain(&mut rx_z)), vec![vec![x.clone(), y.clone(), z.clone()]]);
        drain(&mut rx_x);
        drain(&mut rx_y);

        state.calls.leave_group_call(&x, &group).await;
        assert_eq!(ids(drain(&mut rx_y)), vec![vec![y.clone(), z.clone()]]);

        state.calls.leave_group_call(&y, &group).await;
        state.calls.leave_group_call(&z, &group).await;
        let last = drain(&mut rx_x).pop();
        assert_eq!(
            last,
            Some(ServerEvent::GroupCallEnded { group_id: group.clone(), participants: vec![] })
        );
        assert!(state.store.read(|s| s.group_call(&group).is_none()).await);
    }

    #[tokio::test]
    async fn outsiders_cannot_start_or_join_group_calls() {
        let (_dir, state) = test_state().await;
        let x = add_user(&state.store, "xenia").await;
        let o = add_user(&state.store, "olga").await;
        let group = state
            .store
            .write(|s| s.create_group(&x, NewGroup { name: "Solo".into(), ..NewGroup::default() }, 0))
            .await
            .unwrap()
            .id;

        let err = state.calls.start_group_call(&o, &group).await.unwrap_err();
        assert_eq!(err, MinichatError::Call("Group not found".into()));

        state.calls.start_group_call(&x, &group).await.unwrap();
        assert!(state.calls.join_group_call(&o, &group).await.is_err());
    }

    #[tokio::test]
    async fn group_signals_stay_inside_the_roster() {
        let (_dir, state) = test_state().await;
        let x = add_user(&state.store, "xenia").await;
        let y = add_user(&state.store, "yuri").await;
        let stranger = add_user(&state.store, "sasha").await;
        let group = state
            .store
            .write(|s| {
                let g = s.create_group(&x, NewGroup { name: "Duo".into(), ..NewGroup::default() }, 0)?;
                s.join_group(&g.id, &y)?;
                Ok::<_, MinichatError>(g.id)
            })
            .await
            .unwrap();
        let mut rx_x = connect(&state, &x).await;
        let mut rx_y = connect(&state, &y).await;

        state.calls.start_group_call(&x, &group).await.unwrap();
        drain(&mut rx_x);
        drain(&mut rx_y);

        // y is a member but not on the roster yet.
        state.calls.group_relay(&x, &group, &y, Signal::Offer(json!({"sdp": "a"}))).await;
        state
            .calls
            .group_relay(&stranger, &group, &x, Signal::Offer(json!({"sdp": "b"})))
            .await;
        assert!(drain(&mut rx_x).is_empty());
        assert!(drain(&mut rx_y).is_empty());

        state.calls.join_group_call(&y, &group).await.unwrap();
        drain(&mut rx_x);
        drain(&mut rx_y);

        state.calls.group_relay(&x, &group, &y, Signal::Ice(json!({"c": 1}))).await;
        assert_eq!(
            drain(&mut rx_y),
            vec![ServerEvent::GroupRtcIce {
                group_id: group.clone(),
                from: x.clone(),
                to: y.clone(),
                candidate: json!({"c": 1}),
            }]
        );
    }
}
