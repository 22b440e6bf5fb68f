//! Client event handling: connect, dispatch, disconnect.

use huddle_common::auth::Claims;
use huddle_common::models::{ConnectionId, GroupId, Participant, Profile, UserId};
use huddle_common::store::ChatStore;
use huddle_common::{HuddleError, HuddleResult};
use huddle_voice::{CallType, Invitation, InviteTarget, Left, RoomKey};
use serde_json::json;

use crate::events::{Addressed, ClientEvent, Payload, RoomDescriptor, ServerEvent};
use crate::registry::{ConnectionInfo, OutboundTx};
use crate::router::SignalKind;
use crate::GatewayState;

fn to_payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}

impl<S: ChatStore> GatewayState<S> {
    /// Register an authenticated socket and announce it.
    pub async fn connect(
        &self,
        id: ConnectionId,
        claims: Claims,
        profile: Profile,
        tx: OutboundTx,
    ) -> HuddleResult<()> {
        let user_id = profile.id;
        let username = profile.username.clone();
        let evicted = self.registry.register(id, profile, claims, tx).await?;

        if let Err(e) = self.store.set_status(user_id, "Online").await {
            tracing::warn!(user = user_id, "Failed to persist online status: {e}");
        }
        self.fanout.broadcast_presence().await;

        tracing::info!(
            connection = %id,
            user = %username,
            replaced = evicted.is_some(),
            "Gateway connection ready"
        );
        Ok(())
    }

    /// Handle one client event. Failures are reported in-band to the sender;
    /// the connection stays open.
    pub async fn handle(&self, id: ConnectionId, event: ClientEvent) {
        let Some(me) = self.registry.get(id).await else {
            tracing::debug!(connection = %id, "Event from unregistered connection");
            return;
        };

        let chat_write = event.is_chat_write();
        if let Err(err) = self.dispatch(&me, event).await {
            tracing::debug!(connection = %id, code = err.error_code(), "Event failed: {err}");
            let reply = if chat_write {
                ServerEvent::message_failed(&err)
            } else {
                ServerEvent::error(&err)
            };
            self.registry.send_to(id, reply).await;
        }
    }

    /// Decode one text frame and handle it. Frames that do not parse are
    /// answered with an in-band 4400 error.
    pub async fn handle_text(&self, id: ConnectionId, text: &str) {
        match decode_frame(text) {
            Ok(event) => self.handle(id, event).await,
            Err(err) => {
                self.registry.send_to(id, ServerEvent::error(&err)).await;
            }
        }
    }

    /// Tear down everything a connection owned. Safe to call twice.
    pub async fn disconnect(&self, id: ConnectionId) {
        let Some(info) = self.registry.unregister(id).await else {
            return;
        };
        let user_id = info.user_id();

        for left in self.calls.leave_all(id).await {
            self.notify_left(&left).await;
        }
        for invitation in self.calls.cancel_invitations_from(id).await {
            self.notify_cancelled(&invitation).await;
        }

        // A replaced connection closing must not mark its user offline.
        if !self.registry.is_online(user_id).await {
            if let Err(e) = self.store.set_status(user_id, "Offline").await {
                tracing::warn!(user = user_id, "Failed to persist offline status: {e}");
            }
        }
        self.fanout.broadcast_presence().await;

        tracing::info!(connection = %id, user = %info.profile.username, "Gateway connection closed");
    }

    async fn dispatch(&self, me: &ConnectionInfo, event: ClientEvent) -> HuddleResult<()> {
        match event {
            ClientEvent::JoinVoice { room } => {
                let room = self.authorize_room(me, &room).await?;
                self.join_room(Participant::from_profile(me.id, &me.profile), room)
                    .await;
            }
            ClientEvent::LeaveVoice { room } => {
                let room = room.resolve(me.user_id());
                if let Some(left) = self.calls.leave(&room, me.id).await {
                    self.notify_left(&left).await;
                }
                // A later accept must not pull us back into the room.
                for invitation in self.calls.cancel_invitations_for_room(me.id, &room).await {
                    self.notify_cancelled(&invitation).await;
                }
            }
            ClientEvent::CallInvite { target, call_type } => {
                self.invite(me, target, call_type).await?;
            }
            ClientEvent::CallAccept {
                caller_id,
                group_id,
            } => {
                self.accept(me, caller_id, group_id).await;
            }
            ClientEvent::CallReject {
                caller_id,
                group_id,
                reason,
            } => {
                self.reject(me, caller_id, group_id, reason).await;
            }
            ClientEvent::CallEnd { to, room } => {
                self.end_call(me, to, room).await;
            }
            ClientEvent::Offer(d) => {
                self.router
                    .relay_directed(SignalKind::Offer, me.id, d.to, d.payload)
                    .await;
            }
            ClientEvent::Answer(d) => {
                self.router
                    .relay_directed(SignalKind::Answer, me.id, d.to, d.payload)
                    .await;
            }
            ClientEvent::IceCandidate(d) => {
                self.router
                    .relay_directed(SignalKind::IceCandidate, me.id, d.to, d.payload)
                    .await;
            }
            ClientEvent::VideoToggle(a) => self.relay_addressed(me, SignalKind::VideoToggle, a).await,
            ClientEvent::Speaking(a) => self.relay_addressed(me, SignalKind::Speaking, a).await,
            ClientEvent::SendMessage {
                channel_id,
                message,
            } => {
                self.fanout
                    .post_channel_message(&me.profile, channel_id, &message)
                    .await?;
            }
            ClientEvent::SendDm {
                receiver_id,
                message,
            } => {
                self.fanout
                    .post_direct_message(&me.profile, receiver_id, &message)
                    .await?;
            }
            ClientEvent::SendGroupMessage { group_id, message } => {
                self.fanout
                    .post_group_message(&me.profile, group_id, &message)
                    .await?;
            }
            ClientEvent::AddReaction { message_id, emoji } => {
                self.fanout
                    .react(me.user_id(), message_id, &emoji, true)
                    .await?;
            }
            ClientEvent::RemoveReaction { message_id, emoji } => {
                self.fanout
                    .react(me.user_id(), message_id, &emoji, false)
                    .await?;
            }
            ClientEvent::Ping => {
                let timestamp = self.calls.now().timestamp_millis();
                self.registry
                    .send_to(me.id, ServerEvent::Pong { timestamp })
                    .await;
            }
        }
        Ok(())
    }

    /// Canonical key for a client-named room, checking group membership.
    async fn authorize_room(&self, me: &ConnectionInfo, room: &RoomDescriptor) -> HuddleResult<RoomKey> {
        match room {
            RoomDescriptor::GroupVoice { group_id } => {
                let members = self.store.group_members(*group_id).await?;
                if !members.contains(&me.user_id()) {
                    return Err(HuddleError::Unauthorized);
                }
            }
            RoomDescriptor::Dm { peer_id } if *peer_id == me.user_id() => {
                return Err(HuddleError::validation("Cannot open a DM call with yourself"));
            }
            _ => {}
        }
        Ok(room.resolve(me.user_id()))
    }

    /// Add a participant to a room and tell both sides about each other.
    /// Rejoining is a no-op apart from resending the member list.
    async fn join_room(&self, participant: Participant, room: RoomKey) {
        let conn = participant.connection_id;
        let joined = self.calls.join(room.clone(), participant.clone()).await;

        // The connection may have closed on the way here, after its own
        // disconnect sweep already ran.
        if self.registry.get(conn).await.is_none() {
            tracing::debug!(connection = %conn, room = %room, "Joined connection is gone; sweeping");
            for left in self.calls.leave_all(conn).await {
                self.notify_left(&left).await;
            }
            return;
        }

        self.registry
            .send_to(
                conn,
                ServerEvent::ExistingVoiceUsers {
                    room: room.clone(),
                    users: joined.existing.clone(),
                },
            )
            .await;
        if joined.already_member {
            return;
        }
        for member in &joined.existing {
            self.registry
                .send_to(
                    member.connection_id,
                    ServerEvent::UserJoinedVoice {
                        room: room.clone(),
                        user: participant.clone(),
                    },
                )
                .await;
        }
    }

    pub(crate) async fn notify_left(&self, left: &Left) {
        for member in &left.remaining {
            self.registry
                .send_to(
                    member.connection_id,
                    ServerEvent::UserLeftVoice {
                        room: left.room.clone(),
                        connection_id: left.participant.connection_id,
                    },
                )
                .await;
        }
    }

    /// Stop ringing every callee still waiting on `invitation`.
    pub(crate) async fn notify_cancelled(&self, invitation: &Invitation) {
        for callee in invitation.pending() {
            self.registry
                .send_to_user(
                    callee,
                    ServerEvent::CallCancelled {
                        caller_id: invitation.caller.user_id,
                        target: invitation.target,
                    },
                )
                .await;
        }
    }

    async fn invite(&self, me: &ConnectionInfo, target: InviteTarget, call_type: CallType) -> HuddleResult<()> {
        let caller = Participant::from_profile(me.id, &me.profile);
        let callees = match target {
            InviteTarget::User { user_id } if user_id == me.user_id() => {
                return Err(HuddleError::validation("Cannot call yourself"));
            }
            InviteTarget::User { user_id } => vec![user_id],
            InviteTarget::Group { group_id } => {
                let members = self.store.group_members(group_id).await?;
                if !members.contains(&me.user_id()) {
                    return Err(HuddleError::Unauthorized);
                }
                members
            }
        };

        // Record the invitation before ringing so an instant answer finds it.
        let invitation = self
            .calls
            .invite(caller.clone(), target, call_type, callees)
            .await;
        let payload = to_payload(json!({
            "caller": caller,
            "call_type": call_type,
            "target": target,
        }));

        let ringing = match target {
            InviteTarget::User { user_id } => self
                .router
                .relay_to_user(SignalKind::CallInvite, me.id, user_id, payload)
                .await
                .is_some(),
            InviteTarget::Group { .. } => {
                let mut reached = 0;
                for callee in invitation.pending() {
                    if let Ok(conn) = self.registry.resolve_by_user(callee).await {
                        if self
                            .router
                            .relay_directed(SignalKind::CallInvite, me.id, conn, payload.clone())
                            .await
                        {
                            reached += 1;
                        }
                    }
                }
                if reached == 0 {
                    self.registry
                        .send_to(
                            me.id,
                            ServerEvent::CallUnreachable {
                                target,
                                message: "No group members are online".into(),
                            },
                        )
                        .await;
                }
                reached > 0
            }
        };

        if !ringing {
            self.calls.cancel_invitation(me.user_id(), target).await;
        }
        Ok(())
    }

    /// Accepting joins caller and callee into the call's room. Answers to
    /// invitations that no longer exist are ignored.
    async fn accept(&self, me: &ConnectionInfo, caller_id: UserId, group_id: Option<GroupId>) {
        let target = invite_target(me.user_id(), group_id);
        let Some(invitation) = self.calls.respond(caller_id, target, me.user_id()).await else {
            return;
        };
        if self.registry.get(invitation.caller.connection_id).await.is_none() {
            tracing::debug!(caller = caller_id, "Caller left before the call was accepted");
            return;
        }

        let room = invitation.room();
        let me_participant = Participant::from_profile(me.id, &me.profile);
        let payload = to_payload(json!({
            "responder": me_participant,
            "call_room": room,
        }));
        self.router
            .relay_directed(SignalKind::CallAccept, me.id, invitation.caller.connection_id, payload)
            .await;

        self.join_room(invitation.caller.clone(), room.clone()).await;
        self.join_room(me_participant, room).await;
    }

    async fn reject(
        &self,
        me: &ConnectionInfo,
        caller_id: UserId,
        group_id: Option<GroupId>,
        reason: Option<String>,
    ) {
        let target = invite_target(me.user_id(), group_id);
        let Some(invitation) = self.calls.respond(caller_id, target, me.user_id()).await else {
            return;
        };
        let payload = to_payload(json!({
            "responder": Participant::from_profile(me.id, &me.profile),
            "target": target,
            "reason": reason,
        }));
        self.router
            .relay_directed(SignalKind::CallReject, me.id, invitation.caller.connection_id, payload)
            .await;
    }

    /// Hang up: tell the peer, leave the call's room, and stop anything still
    /// ringing on our behalf.
    async fn end_call(&self, me: &ConnectionInfo, to: Option<ConnectionId>, room: Option<RoomDescriptor>) {
        if let Some(peer) = to {
            self.router
                .relay_directed(SignalKind::CallEnd, me.id, peer, Payload::new())
                .await;
        }

        let departures: Vec<Left> = match room {
            Some(room) => {
                let room = room.resolve(me.user_id());
                self.calls.leave(&room, me.id).await.into_iter().collect()
            }
            None => self.calls.leave_dm_rooms(me.id).await,
        };
        for left in &departures {
            self.notify_left(left).await;
        }

        for invitation in self.calls.cancel_invitations_from(me.id).await {
            self.notify_cancelled(&invitation).await;
        }
    }

    /// `to` wins over `room`; with neither, every room the sender is in.
    async fn relay_addressed(&self, me: &ConnectionInfo, kind: SignalKind, addressed: Addressed) {
        let Addressed { to, room, payload } = addressed;
        if let Some(peer) = to {
            self.router.relay_directed(kind, me.id, peer, payload).await;
            return;
        }
        let rooms = match room {
            Some(room) => vec![room.resolve(me.user_id())],
            None => self.calls.rooms_of(me.id).await,
        };
        for room in rooms {
            self.router
                .relay_to_room(kind, me.id, &room, payload.clone())
                .await;
        }
    }
}

fn decode_frame(text: &str) -> HuddleResult<ClientEvent> {
    serde_json::from_str(text).map_err(|e| HuddleError::validation(format!("Malformed event: {e}")))
}

fn invite_target(me: UserId, group_id: Option<GroupId>) -> InviteTarget {
    match group_id {
        Some(group_id) => InviteTarget::Group { group_id },
        None => InviteTarget::User { user_id: me },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Directed;
    use crate::registry::Outbound;
    use crate::testing::{drain, Harness};
    use huddle_common::models::MessageDraft;
    use huddle_voice::{CallDuration, Clock};

    fn general() -> RoomDescriptor {
        RoomDescriptor::ServerVoice {
            channel_name: "general".into(),
        }
    }

    fn seconds(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[tokio::test]
    async fn voice_call_end_to_end() {
        let mut h = Harness::new();
        let t0 = h.clock.now();
        let mut a = h.connect(1).await;
        let mut b = h.connect(2).await;
        let mut c = h.connect(3).await;
        drain(&mut a.rx);
        drain(&mut b.rx);
        drain(&mut c.rx);

        h.state.handle(a.id, ClientEvent::JoinVoice { room: general() }).await;
        assert_eq!(h.pump_lifecycle().await, 1);
        for rx in [&mut a.rx, &mut b.rx, &mut c.rx] {
            let started: Vec<_> = drain(rx)
                .into_iter()
                .filter_map(|e| match e {
                    ServerEvent::CallStarted(s) => Some(s),
                    _ => None,
                })
                .collect();
            assert_eq!(started.len(), 1);
            assert_eq!(started[0].started_at, t0);
        }

        h.clock.advance(seconds(5));
        h.state.handle(b.id, ClientEvent::JoinVoice { room: general() }).await;
        assert_eq!(h.pump_lifecycle().await, 0);
        let to_b = drain(&mut b.rx);
        let Some(ServerEvent::ExistingVoiceUsers { users, .. }) = to_b.first() else {
            panic!("expected existing-voice-users, got {to_b:?}");
        };
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].connection_id, a.id);
        assert!(matches!(
            drain(&mut a.rx).as_slice(),
            [ServerEvent::UserJoinedVoice { .. }]
        ));

        h.state.handle(a.id, ClientEvent::LeaveVoice { room: general() }).await;
        assert_eq!(h.pump_lifecycle().await, 0);
        assert!(matches!(
            drain(&mut b.rx).as_slice(),
            [ServerEvent::UserLeftVoice { connection_id, .. }] if *connection_id == a.id
        ));

        h.clock.advance(seconds(10));
        h.state.handle(b.id, ClientEvent::LeaveVoice { room: general() }).await;
        assert_eq!(h.pump_lifecycle().await, 1);

        let ended: Vec<_> = drain(&mut c.rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::CallEnded { ended, duration_text } => Some((ended, duration_text)),
                _ => None,
            })
            .collect();
        assert_eq!(ended.len(), 1);
        let (ended, text) = &ended[0];
        assert_eq!(ended.started_at, t0);
        assert_eq!(ended.duration, CallDuration { minutes: 0, seconds: 15 });
        assert_eq!(text, "0 minutes 15 seconds");
    }

    #[tokio::test]
    async fn disconnect_sweeps_rooms_and_marks_offline() {
        let mut h = Harness::new();
        let mut a = h.connect(1).await;
        let mut b = h.connect(2).await;
        h.state.handle(a.id, ClientEvent::JoinVoice { room: general() }).await;
        h.state.handle(b.id, ClientEvent::JoinVoice { room: general() }).await;
        h.pump_lifecycle().await;
        drain(&mut a.rx);
        drain(&mut b.rx);

        h.state.disconnect(a.id).await;
        h.state.disconnect(a.id).await;
        assert_eq!(h.pump_lifecycle().await, 0);

        let events = drain(&mut b.rx);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::UserLeftVoice { .. }, ServerEvent::UserListUpdate { users }] if users.len() == 1
        ));
        assert_eq!(h.store.status(1).as_deref(), Some("Offline"));
        assert_eq!(h.store.status(2).as_deref(), Some("Online"));

        h.state.disconnect(b.id).await;
        assert_eq!(h.pump_lifecycle().await, 1);
    }

    #[tokio::test]
    async fn replaced_connection_closing_keeps_user_online() {
        let h = Harness::new();
        let mut old = h.connect(1).await;
        let _new = h.connect(1).await;

        let outbound: Vec<_> = std::iter::from_fn(|| old.rx.try_recv().ok()).collect();
        assert!(outbound.contains(&Outbound::Event(ServerEvent::SessionReplaced)));
        assert!(matches!(outbound.last(), Some(Outbound::Close { .. })));

        h.state.disconnect(old.id).await;
        assert!(h.state.registry.is_online(1).await);
        assert_eq!(h.store.status(1).as_deref(), Some("Online"));
    }

    #[tokio::test]
    async fn dm_call_accept_joins_both_parties() {
        let mut h = Harness::new();
        let mut alice = h.connect(1).await;
        let mut bob = h.connect(2).await;
        drain(&mut alice.rx);
        drain(&mut bob.rx);

        h.state
            .handle(
                alice.id,
                ClientEvent::CallInvite {
                    target: InviteTarget::User { user_id: 2 },
                    call_type: CallType::Video,
                },
            )
            .await;
        let Some(ServerEvent::IncomingCall(ring)) = drain(&mut bob.rx).pop() else {
            panic!("bob should be ringing");
        };
        assert_eq!(ring.from, alice.id);
        assert_eq!(ring.payload["call_type"], "video");

        h.state
            .handle(bob.id, ClientEvent::CallAccept { caller_id: 1, group_id: None })
            .await;
        assert_eq!(h.pump_lifecycle().await, 1);

        let room = RoomKey::dm_pair(1, 2);
        assert_eq!(h.state.calls.members_of(&room).await.len(), 2);
        let to_alice = drain(&mut alice.rx);
        assert!(matches!(to_alice.first(), Some(ServerEvent::CallAccepted(_))));
        assert!(to_alice
            .iter()
            .any(|e| matches!(e, ServerEvent::CallStarted(s) if s.room == room)));

        // A second accept for the same call is stale and changes nothing.
        h.state
            .handle(bob.id, ClientEvent::CallAccept { caller_id: 1, group_id: None })
            .await;
        assert!(drain(&mut alice.rx).is_empty());
        assert_eq!(h.pump_lifecycle().await, 0);
        drain(&mut bob.rx);

        h.state
            .handle(alice.id, ClientEvent::CallEnd { to: Some(bob.id), room: None })
            .await;
        let to_bob = drain(&mut bob.rx);
        assert!(matches!(to_bob.first(), Some(ServerEvent::PeerEndedCall(r)) if r.from == alice.id));
        assert!(h.state.calls.rooms_of(alice.id).await.is_empty());
    }

    #[tokio::test]
    async fn inviting_offline_user_reports_unreachable() {
        let h = Harness::new();
        let mut alice = h.connect(1).await;
        drain(&mut alice.rx);

        h.state
            .handle(
                alice.id,
                ClientEvent::CallInvite {
                    target: InviteTarget::User { user_id: 9 },
                    call_type: CallType::Audio,
                },
            )
            .await;
        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::CallUnreachable { .. }]
        ));
        assert_eq!(h.state.calls.stats().await.pending_invitations, 0);
    }

    #[tokio::test]
    async fn caller_hangup_cancels_ringing() {
        let h = Harness::new();
        let mut alice = h.connect(1).await;
        let mut bob = h.connect(2).await;
        h.state
            .handle(
                alice.id,
                ClientEvent::CallInvite {
                    target: InviteTarget::User { user_id: 2 },
                    call_type: CallType::Audio,
                },
            )
            .await;
        drain(&mut alice.rx);
        drain(&mut bob.rx);

        h.state.disconnect(alice.id).await;
        let to_bob = drain(&mut bob.rx);
        assert!(to_bob.contains(&ServerEvent::CallCancelled {
            caller_id: 1,
            target: InviteTarget::User { user_id: 2 },
        }));

        // Bob answering afterwards is a no-op.
        h.state
            .handle(bob.id, ClientEvent::CallAccept { caller_id: 1, group_id: None })
            .await;
        assert!(h.state.calls.rooms_of(bob.id).await.is_empty());
    }

    #[tokio::test]
    async fn group_call_rings_online_members_and_tracks_rejects() {
        let h = Harness::new();
        h.store.add_group(7, &[1, 2, 3, 4]);
        let mut alice = h.connect(1).await;
        let mut bob = h.connect(2).await;
        let mut carol = h.connect(3).await;
        drain(&mut alice.rx);
        drain(&mut bob.rx);
        drain(&mut carol.rx);

        let target = InviteTarget::Group { group_id: 7 };
        h.state
            .handle(alice.id, ClientEvent::CallInvite { target, call_type: CallType::Audio })
            .await;
        assert!(matches!(drain(&mut bob.rx).as_slice(), [ServerEvent::IncomingCall(_)]));
        assert!(matches!(drain(&mut carol.rx).as_slice(), [ServerEvent::IncomingCall(_)]));

        h.state
            .handle(
                bob.id,
                ClientEvent::CallReject {
                    caller_id: 1,
                    group_id: Some(7),
                    reason: Some("busy".into()),
                },
            )
            .await;
        let Some(ServerEvent::CallRejected(rejected)) = drain(&mut alice.rx).pop() else {
            panic!("caller should hear the rejection");
        };
        assert_eq!(rejected.payload["reason"], "busy");

        // Carol (and offline user 4) are still pending.
        assert_eq!(h.state.calls.stats().await.pending_invitations, 1);

        h.state
            .handle(carol.id, ClientEvent::CallAccept { caller_id: 1, group_id: Some(7) })
            .await;
        let members = h.state.calls.members_of(&RoomKey::group_voice(7)).await;
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn caller_leaving_group_room_stops_the_ringing() {
        let h = Harness::new();
        h.store.add_group(7, &[1, 2, 3]);
        let mut alice = h.connect(1).await;
        let bob = h.connect(2).await;
        let mut carol = h.connect(3).await;

        let target = InviteTarget::Group { group_id: 7 };
        h.state
            .handle(alice.id, ClientEvent::CallInvite { target, call_type: CallType::Audio })
            .await;
        h.state
            .handle(bob.id, ClientEvent::CallAccept { caller_id: 1, group_id: Some(7) })
            .await;
        drain(&mut alice.rx);
        drain(&mut carol.rx);

        let group_room = RoomDescriptor::GroupVoice { group_id: 7 };
        h.state
            .handle(alice.id, ClientEvent::LeaveVoice { room: group_room })
            .await;
        assert!(drain(&mut carol.rx).contains(&ServerEvent::CallCancelled { caller_id: 1, target }));
        assert_eq!(h.state.calls.stats().await.pending_invitations, 0);

        h.state
            .handle(carol.id, ClientEvent::CallAccept { caller_id: 1, group_id: Some(7) })
            .await;
        let members = h.state.calls.members_of(&RoomKey::group_voice(7)).await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].connection_id, bob.id);
    }

    #[tokio::test]
    async fn join_after_disconnect_sweep_leaves_no_stale_member() {
        let mut h = Harness::new();
        let alice = h.connect(1).await;
        let _bob = h.connect(2).await;
        let caller = Participant::from_profile(alice.id, &h.store.profile(1));
        let room = RoomKey::dm_pair(1, 2);

        // Alice's socket closes after an accept looked her up but before it
        // put her in the call room.
        h.state.disconnect(alice.id).await;
        h.state.join_room(caller, room.clone()).await;

        assert!(h.state.calls.members_of(&room).await.is_empty());
        assert!(h.state.calls.rooms_of(alice.id).await.is_empty());
        assert_eq!(h.state.calls.stats().await.active_sessions, 0);
        // The brief session is still closed out.
        assert_eq!(h.pump_lifecycle().await, 2);
    }

    #[tokio::test]
    async fn accept_interleaved_with_caller_disconnect_ends_cleanly() {
        let mut h = Harness::new();
        let alice = h.connect(1).await;
        let bob = h.connect(2).await;
        h.state
            .handle(
                alice.id,
                ClientEvent::CallInvite {
                    target: InviteTarget::User { user_id: 2 },
                    call_type: CallType::Audio,
                },
            )
            .await;

        tokio::join!(
            h.state
                .handle(bob.id, ClientEvent::CallAccept { caller_id: 1, group_id: None }),
            h.state.disconnect(alice.id),
        );
        h.state.disconnect(bob.id).await;

        let room = RoomKey::dm_pair(1, 2);
        assert!(h.state.calls.members_of(&room).await.is_empty());
        assert_eq!(h.state.calls.stats().await.active_sessions, 0);
        let pumped = h.pump_lifecycle().await;
        assert_eq!(pumped % 2, 0);
    }

    #[tokio::test]
    async fn non_member_cannot_join_group_voice() {
        let h = Harness::new();
        h.store.add_group(7, &[2, 3]);
        let mut alice = h.connect(1).await;
        drain(&mut alice.rx);

        h.state
            .handle(
                alice.id,
                ClientEvent::JoinVoice {
                    room: RoomDescriptor::GroupVoice { group_id: 7 },
                },
            )
            .await;
        assert!(matches!(
            drain(&mut alice.rx).as_slice(),
            [ServerEvent::Error { code: 4003, .. }]
        ));
        assert!(h.state.calls.rooms_of(alice.id).await.is_empty());
    }

    #[tokio::test]
    async fn signaling_reaches_only_the_target() {
        let h = Harness::new();
        let mut a = h.connect(1).await;
        let mut b = h.connect(2).await;
        let mut c = h.connect(3).await;
        drain(&mut a.rx);
        drain(&mut b.rx);
        drain(&mut c.rx);

        let mut payload = Payload::new();
        payload.insert("answer".into(), json!({ "type": "answer", "sdp": "v=0" }));
        h.state
            .handle(a.id, ClientEvent::Answer(Directed { to: b.id, payload: payload.clone() }))
            .await;

        let Some(ServerEvent::Answer(relayed)) = drain(&mut b.rx).pop() else {
            panic!("expected answer");
        };
        assert_eq!(relayed.from, a.id);
        assert_eq!(relayed.payload, payload);
        assert!(drain(&mut c.rx).is_empty());
        assert!(drain(&mut a.rx).is_empty());
    }

    #[tokio::test]
    async fn speaking_without_target_goes_to_my_rooms() {
        let h = Harness::new();
        let mut a = h.connect(1).await;
        let mut b = h.connect(2).await;
        let mut c = h.connect(3).await;
        h.state.handle(a.id, ClientEvent::JoinVoice { room: general() }).await;
        h.state.handle(b.id, ClientEvent::JoinVoice { room: general() }).await;
        drain(&mut a.rx);
        drain(&mut b.rx);
        drain(&mut c.rx);

        let mut payload = Payload::new();
        payload.insert("speaking".into(), json!(true));
        h.state
            .handle(
                a.id,
                ClientEvent::Speaking(Addressed {
                    to: None,
                    room: None,
                    payload,
                }),
            )
            .await;
        assert!(matches!(drain(&mut b.rx).as_slice(), [ServerEvent::UserSpeaking(_)]));
        assert!(drain(&mut c.rx).is_empty());
    }

    #[tokio::test]
    async fn failed_chat_write_reports_message_failed() {
        let h = Harness::new();
        let mut a = h.connect(1).await;
        let mut b = h.connect(2).await;
        drain(&mut a.rx);
        drain(&mut b.rx);

        h.store.fail_writes(true);
        h.state
            .handle(
                a.id,
                ClientEvent::SendMessage {
                    channel_id: 1,
                    message: MessageDraft {
                        text: "hello".into(),
                        file: None,
                    },
                },
            )
            .await;
        assert!(matches!(
            drain(&mut a.rx).as_slice(),
            [ServerEvent::MessageFailed { code: 5000, .. }]
        ));
        assert!(drain(&mut b.rx).is_empty());
    }

    #[tokio::test]
    async fn ping_answers_with_clock_time() {
        let h = Harness::new();
        let mut a = h.connect(1).await;
        drain(&mut a.rx);

        h.state.handle(a.id, ClientEvent::Ping).await;
        assert_eq!(
            drain(&mut a.rx),
            vec![ServerEvent::Pong {
                timestamp: h.clock.now().timestamp_millis()
            }]
        );
    }
}
