//! Call coordinator: membership, sessions, and invitations behind one lock.
//!
//! Every membership mutation and the lifecycle check that follows it run in a
//! single critical section with no await inside, so two joins racing into an
//! empty room cannot both observe `was_empty`. Lifecycle events are pushed onto
//! the events channel while the lock is held, which makes the channel order the
//! transition order.

use chrono::{DateTime, Utc};
use huddle_common::models::{ConnectionId, Participant, UserId};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::clock::Clock;
use crate::invite::{CallType, InvitationBook, Invitation, InviteTarget};
use crate::room::{LeaveOutcome, RoomKey, RoomMembership};
use crate::session::{CallEnded, CallStarted, LifecycleEvent, SessionTracker};

#[derive(Debug, Default)]
struct VoiceState {
    rooms: RoomMembership,
    sessions: SessionTracker,
    invitations: InvitationBook,
}

/// Result of a join.
#[derive(Debug, Clone)]
pub struct Joined {
    /// Members that were already in the room, in join order.
    pub existing: Vec<Participant>,
    pub already_member: bool,
    pub started: Option<CallStarted>,
}

/// Result of removing one connection from one room.
#[derive(Debug, Clone)]
pub struct Left {
    pub room: RoomKey,
    pub participant: Participant,
    /// Members still in the room.
    pub remaining: Vec<Participant>,
    pub ended: Option<CallEnded>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct VoiceStats {
    pub active_rooms: usize,
    pub active_sessions: usize,
    pub participants: usize,
    pub pending_invitations: usize,
}

#[derive(Clone)]
pub struct CallCoordinator {
    state: Arc<Mutex<VoiceState>>,
    clock: Arc<dyn Clock>,
    events: mpsc::UnboundedSender<LifecycleEvent>,
}

impl CallCoordinator {
    /// Create an empty coordinator. Session transitions are sent to `events`.
    pub fn new(clock: Arc<dyn Clock>, events: mpsc::UnboundedSender<LifecycleEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(VoiceState::default())),
            clock,
            events,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Add `participant` to `room`, starting a session if the room was empty.
    pub async fn join(&self, room: RoomKey, participant: Participant) -> Joined {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let existing = state.rooms.others_in(&room, participant.connection_id);
        let outcome = state.rooms.join(&room, participant.clone());
        let started = state.sessions.on_join(&room, &participant, outcome, now);

        if let Some(ref s) = started {
            emit(&self.events, LifecycleEvent::Started(s.clone()));
        }
        if !outcome.already_member {
            tracing::info!(
                room = %room,
                connection = %participant.connection_id,
                user = participant.user_id,
                "Joined voice room"
            );
        }

        Joined {
            existing,
            already_member: outcome.already_member,
            started,
        }
    }

    /// Remove `connection` from `room`. `None` when it was not a member.
    pub async fn leave(&self, room: &RoomKey, connection: ConnectionId) -> Option<Left> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        Self::leave_locked(&mut state, room, connection, now, &self.events)
    }

    /// Remove `connection` from every room it is in, in one critical section.
    pub async fn leave_all(&self, connection: ConnectionId) -> Vec<Left> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let departures = state.rooms.leave_all(connection);
        departures
            .into_iter()
            .map(|d| {
                let outcome = LeaveOutcome {
                    removed: Some(d.participant.clone()),
                    is_empty_now: d.is_empty_now,
                };
                let ended = state.sessions.on_leave(&d.room, &outcome, now);
                if let Some(ref e) = ended {
                    emit(&self.events, LifecycleEvent::Ended(e.clone()));
                }
                tracing::info!(room = %d.room, connection = %connection, "Swept from voice room");
                Left {
                    remaining: state.rooms.members_of(&d.room).to_vec(),
                    room: d.room,
                    participant: d.participant,
                    ended,
                }
            })
            .collect()
    }

    /// Remove `connection` from every DM-pair room it is in.
    pub async fn leave_dm_rooms(&self, connection: ConnectionId) -> Vec<Left> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();

        let rooms: Vec<RoomKey> = state
            .rooms
            .rooms_of(connection)
            .into_iter()
            .filter(RoomKey::is_dm)
            .collect();
        rooms
            .iter()
            .filter_map(|room| Self::leave_locked(&mut state, room, connection, now, &self.events))
            .collect()
    }

    pub async fn members_of(&self, room: &RoomKey) -> Vec<Participant> {
        self.state.lock().await.rooms.members_of(room).to_vec()
    }

    pub async fn rooms_of(&self, connection: ConnectionId) -> Vec<RoomKey> {
        self.state.lock().await.rooms.rooms_of(connection)
    }

    pub async fn session_started_at(&self, room: &RoomKey) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .sessions
            .session(room)
            .map(|s| s.started_at)
    }

    /// Start ringing `callees` on behalf of `caller`.
    pub async fn invite(
        &self,
        caller: Participant,
        target: InviteTarget,
        call_type: CallType,
        callees: Vec<UserId>,
    ) -> Invitation {
        let now = self.clock.now();
        let invitation = self
            .state
            .lock()
            .await
            .invitations
            .create(caller, target, call_type, callees, now);
        tracing::info!(
            caller = invitation.caller.user_id,
            target = ?target,
            "Call invitation created"
        );
        invitation
    }

    /// Record an accept/reject. `None` means the invitation is stale.
    pub async fn respond(
        &self,
        caller: UserId,
        target: InviteTarget,
        responder: UserId,
    ) -> Option<Invitation> {
        let answered = self
            .state
            .lock()
            .await
            .invitations
            .respond(caller, target, responder);
        if answered.is_none() {
            tracing::debug!(caller, responder, target = ?target, "Ignoring stale invitation response");
        }
        answered
    }

    pub async fn cancel_invitation(&self, caller: UserId, target: InviteTarget) -> Option<Invitation> {
        self.state.lock().await.invitations.cancel(caller, target)
    }

    /// Drop every invitation placed from `connection`.
    pub async fn cancel_invitations_from(&self, connection: ConnectionId) -> Vec<Invitation> {
        self.state.lock().await.invitations.cancel_from(connection)
    }

    /// Drop invitations from `connection` that would lead into `room`.
    pub async fn cancel_invitations_for_room(
        &self,
        connection: ConnectionId,
        room: &RoomKey,
    ) -> Vec<Invitation> {
        self.state
            .lock()
            .await
            .invitations
            .cancel_for_room(connection, room)
    }

    /// Expire invitations older than `ttl`.
    pub async fn expire_invitations(&self, ttl: std::time::Duration) -> Vec<Invitation> {
        let now = self.clock.now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expired = self.state.lock().await.invitations.expire(now, ttl);
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired stale call invitations");
        }
        expired
    }

    pub async fn stats(&self) -> VoiceStats {
        let state = self.state.lock().await;
        VoiceStats {
            active_rooms: state.rooms.room_count(),
            active_sessions: state.sessions.active_count(),
            participants: state.rooms.participant_count(),
            pending_invitations: state.invitations.len(),
        }
    }

    fn leave_locked(
        state: &mut VoiceState,
        room: &RoomKey,
        connection: ConnectionId,
        now: DateTime<Utc>,
        events: &mpsc::UnboundedSender<LifecycleEvent>,
    ) -> Option<Left> {
        let outcome = state.rooms.leave(room, connection);
        let ended = state.sessions.on_leave(room, &outcome, now);
        let participant = outcome.removed?;

        if let Some(ref e) = ended {
            emit(events, LifecycleEvent::Ended(e.clone()));
        }
        tracing::info!(room = %room, connection = %connection, "Left voice room");

        Some(Left {
            room: room.clone(),
            participant,
            remaining: state.rooms.members_of(room).to_vec(),
            ended,
        })
    }
}

fn emit(events: &mpsc::UnboundedSender<LifecycleEvent>, event: LifecycleEvent) {
    if events.send(event).is_err() {
        tracing::warn!("Lifecycle receiver dropped; call notification lost");
    }
}
